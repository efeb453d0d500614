//! Agent storage and per-agent behaviour for the Throng engine.
//!
//! - [`pool`]: fixed-capacity slot array with generation-checked handles
//! - [`routines`]: per-tier update routines run by the scheduler
//! - [`collab`]: contracts for the attribute and persistence collaborators
//! - [`config`]: routine rates
//! - [`error`]: pool and per-agent errors

pub mod collab;
pub mod config;
pub mod error;
pub mod pool;
pub mod routines;

pub use collab::{AgentAttributeStore, DirtyTracker, InMemoryAttributeStore, PersistenceGateway};
pub use config::RoutineConfig;
pub use error::{AgentError, PoolError};
pub use pool::{AgentPool, AgentSlot, PoolStats, SlotHandle};
pub use routines::{RoutineContext, SocialField, run_routine};
