//! Shared type definitions for the Throng population engine.
//!
//! This crate is the single source of truth for the records that flow
//! between the pool, the scheduler, and the inference layer. It holds no
//! behaviour beyond small derivations (cluster keys, tier ordering) so that
//! every other crate can depend on it without pulling in a runtime.
//!
//! # Modules
//!
//! - [`ids`] -- Identifier newtypes for agents and inference batches
//! - [`enums`] -- Tiers, slot lifecycle states, performance states, response categories
//! - [`structs`] -- Agent records, feature vectors, cluster keys, analysis payloads

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{HardwareClass, LifecycleState, PerformanceState, ResponseCategory, Tier};
pub use ids::{AgentId, BatchId, RunId};
pub use structs::{
    AgentProfile, AgentRecord, AnalysisResult, ClusterKey, ContentDescriptor, FeatureVector,
    InfluenceDelta, TierAssignment,
};
