//! Representative sampling, inference caching, and result propagation.
//!
//! Calling the inference service once per agent per tick is far too
//! expensive. This crate amortizes calls across clusters of similar agents:
//!
//! - [`selector`] picks one representative per cluster needing refresh
//! - [`content`] derives the cache key from content and cluster
//! - [`cache`] serves fresh results; [`inflight`] dedups outstanding calls
//! - [`dispatcher`] runs calls on tokio under a timeout
//! - [`breaker`] pauses submissions after repeated failures
//! - [`propagation`] applies a result to the whole cluster
//! - [`pipeline`] composes all of the above into the tick's inference phase
//!
//! Backends live in [`service`]: an OpenAI-compatible HTTP client and a
//! deterministic heuristic analyzer.

pub mod breaker;
pub mod cache;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod inflight;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod propagation;
pub mod selector;
pub mod service;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::{CacheEntry, CacheSettings, CacheStats, InferenceCache};
pub use content::ContentHash;
pub use dispatcher::{Completion, DispatchStats, InferenceDispatcher};
pub use error::InferenceError;
pub use inflight::{InFlightRegistry, InFlightTicket};
pub use pipeline::{CycleReport, DrainReport, InferencePipeline, PipelineSettings};
pub use propagation::{
    DistanceWeights, PropagationEngine, PropagationReport, PropagationSettings, feature_distance,
    propagation_strength,
};
pub use selector::{
    PriorityWeights, Representative, SelectorSettings, needs_refresh, select_representatives,
};
pub use service::{
    BackendSettings, HeuristicInferenceService, HttpInferenceService, InferenceBackend,
    InferenceService, create_backend,
};
