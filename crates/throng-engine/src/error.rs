//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup and the run loop so
//! `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: throng_core::config::ConfigError,
    },

    /// The inference backend could not be created.
    #[error("inference backend error: {source}")]
    Backend {
        /// The underlying inference error.
        #[from]
        source: throng_inference::InferenceError,
    },

    /// Engine construction failed.
    #[error("engine init error: {source}")]
    Init {
        /// The underlying engine error.
        #[from]
        source: throng_core::engine::EngineError,
    },

    /// The simulation loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: throng_core::runner::RunnerError,
    },
}
