//! Error types for the throng-agents crate.
//!
//! Pool operations and per-agent update routines return typed errors rather
//! than panicking. None of these are fatal to the tick loop: the pool tells
//! the caller to shed load, and the scheduler skips a failing agent.

use throng_types::{AgentId, LifecycleState};

/// Errors raised by the fixed-capacity agent pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No free slot remains; the pool never grows past its capacity.
    #[error("agent pool exhausted (capacity {capacity})")]
    Exhausted {
        /// Fixed capacity of the pool.
        capacity: u32,
    },

    /// The handle refers to a slot that has since been released and reused.
    #[error("stale slot handle for slot {index} (generation {generation})")]
    StaleHandle {
        /// Slot index the handle points at.
        index: u32,
        /// Generation the handle was issued with.
        generation: u32,
    },

    /// The requested lifecycle transition is not allowed.
    #[error("illegal slot transition on slot {index}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Slot index.
        index: u32,
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// The slot is still referenced by an in-flight analysis.
    #[error("slot {index} still has {count} outstanding references")]
    Referenced {
        /// Slot index.
        index: u32,
        /// Outstanding reference count.
        count: u32,
    },

    /// The record installed into a slot belongs to a different agent.
    #[error("record for {record} does not match slot owner {owner}")]
    OwnerMismatch {
        /// Agent the slot was acquired for.
        owner: AgentId,
        /// Agent named by the record.
        record: AgentId,
    },
}

/// Errors raised while updating a single agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// The record holds non-finite or out-of-range values.
    #[error("malformed record for {agent_id}: {reason}")]
    MalformedRecord {
        /// The offending agent.
        agent_id: AgentId,
        /// What was wrong with it.
        reason: String,
    },

    /// The agent is not present in the pool or store.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
}
