//! Collaborator contracts.
//!
//! The political attribute model and the persistence layer live outside
//! the engine. The core only needs a narrow read/write surface from each,
//! expressed as the traits below. [`InMemoryAttributeStore`] and
//! [`DirtyTracker`] are the reference implementations used by the binary
//! and the tests.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use throng_types::{AgentId, FeatureVector, InfluenceDelta};

/// Read/write access to per-agent domain attributes.
pub trait AgentAttributeStore: Send + Sync {
    /// Current feature vector of an agent, if known.
    fn feature_vector(&self, agent: AgentId) -> Option<FeatureVector>;

    /// Current influence (engagement) score of an agent, if known.
    fn influence_score(&self, agent: AgentId) -> Option<f32>;

    /// Record an influence delta produced by propagation.
    fn apply_influence(&self, delta: &InfluenceDelta);
}

/// Sink for "this agent changed" notifications.
pub trait PersistenceGateway: Send + Sync {
    /// Mark an agent as needing a save.
    fn mark_dirty(&self, agent: AgentId);
}

#[derive(Debug, Clone)]
struct StoredAttributes {
    features: FeatureVector,
    influence: f32,
    deltas_applied: u32,
}

/// Attribute store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    agents: Mutex<HashMap<AgentId, StoredAttributes>>,
}

impl InMemoryAttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent's attributes.
    pub fn insert(&self, agent: AgentId, features: FeatureVector, influence: f32) {
        self.agents.lock().insert(
            agent,
            StoredAttributes {
                features,
                influence: influence.clamp(0.0, 1.0),
                deltas_applied: 0,
            },
        );
    }

    /// Forget an agent.
    pub fn remove(&self, agent: AgentId) {
        self.agents.lock().remove(&agent);
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.lock().is_empty()
    }

    /// How many influence deltas have been applied to `agent`.
    pub fn deltas_applied(&self, agent: AgentId) -> u32 {
        self.agents
            .lock()
            .get(&agent)
            .map_or(0, |a| a.deltas_applied)
    }
}

impl AgentAttributeStore for InMemoryAttributeStore {
    fn feature_vector(&self, agent: AgentId) -> Option<FeatureVector> {
        self.agents.lock().get(&agent).map(|a| a.features)
    }

    fn influence_score(&self, agent: AgentId) -> Option<f32> {
        self.agents.lock().get(&agent).map(|a| a.influence)
    }

    fn apply_influence(&self, delta: &InfluenceDelta) {
        let mut agents = self.agents.lock();
        if let Some(attrs) = agents.get_mut(&delta.agent_id) {
            attrs.influence = (attrs.influence + delta.engagement_delta).clamp(0.0, 1.0);
            attrs.deltas_applied = attrs.deltas_applied.saturating_add(1);
        }
    }
}

/// Collects dirty agent ids until the persistence collaborator drains them.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    dirty: Mutex<BTreeSet<AgentId>>,
}

impl DirtyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every dirty id, in ascending order.
    pub fn drain(&self) -> Vec<AgentId> {
        std::mem::take(&mut *self.dirty.lock()).into_iter().collect()
    }

    /// Number of pending dirty ids.
    pub fn len(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.dirty.lock().is_empty()
    }
}

impl PersistenceGateway for DirtyTracker {
    fn mark_dirty(&self, agent: AgentId) {
        self.dirty.lock().insert(agent);
    }
}
