//! Error types for the inference layer.
//!
//! Every variant is non-fatal to the tick loop: a failed call clears its
//! in-flight marker, counts against the circuit breaker, and the affected
//! agents become eligible again on a later selection cycle.

/// Errors raised by inference backends and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("inference request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("inference endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, or a placeholder if unreadable.
        body: String,
    },

    /// The response could not be parsed into analysis results.
    #[error("inference response parse error: {0}")]
    Parse(String),

    /// The backend returned a different number of results than profiles.
    #[error("expected {expected} analysis results, got {actual}")]
    ResultCount {
        /// Number of profiles submitted.
        expected: usize,
        /// Number of results returned.
        actual: usize,
    },

    /// A prompt template failed to load or render.
    #[error("prompt template error: {0}")]
    Template(String),

    /// The call did not complete within the request timeout.
    #[error("inference call timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The spawned call was cancelled or panicked.
    #[error("inference task aborted: {0}")]
    Aborted(String),

    /// JSON serialization or deserialization failure.
    #[error("serde error: {source}")]
    Serde {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
