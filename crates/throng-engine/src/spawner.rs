//! Random population generator.
//!
//! The spawner creates agents with seeded random features so a run with
//! the same `world.seed` produces the same population. Each agent placed
//! in the pool is also registered with the attribute store, which is what
//! propagation later writes influence deltas to.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use throng_agents::{InMemoryAttributeStore, PoolError};
use throng_core::Engine;
use throng_inference::InferenceService;
use throng_types::{AgentId, AgentRecord, FeatureVector};
use tracing::warn;

/// Share of agents living in an urban locale.
const URBAN_SHARE: f64 = 0.6;

/// Share of agents with an outsized audience.
const INFLUENCER_SHARE: f64 = 0.05;

/// Largest focus distance handed out; beyond the default Low threshold so
/// some agents start out Dormant on distance alone.
const MAX_FOCUS_DISTANCE: f32 = 600.0;

/// Generates agent records and places them in an engine.
#[derive(Debug)]
pub struct Spawner {
    rng: StdRng,
    next_id: u64,
    volatile_fraction: f64,
    store: Arc<InMemoryAttributeStore>,
}

impl Spawner {
    /// Create a spawner seeded with `seed`.
    ///
    /// `volatile_fraction` is the probability that a new agent is volatile.
    pub fn new(seed: u64, volatile_fraction: f64, store: Arc<InMemoryAttributeStore>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_id: 0,
            volatile_fraction: volatile_fraction.clamp(0.0, 1.0),
            store,
        }
    }

    /// Generate the next record. Ids are handed out sequentially.
    pub fn generate(&mut self) -> AgentRecord {
        let id = AgentId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        let features = FeatureVector {
            age: self.rng.random_range(18..=90),
            education: self.rng.random_range(0..=4),
            urban: self.rng.random_bool(URBAN_SHARE),
            economic_axis: self.rng.random_range(-1.0..=1.0),
            social_axis: self.rng.random_range(-1.0..=1.0),
        };
        let mut record = AgentRecord::new(id, features);
        record.volatile = self.rng.random_bool(self.volatile_fraction);
        record.engagement = self.rng.random_range(0.0..=1.0);
        record.social_reach = if self.rng.random_bool(INFLUENCER_SHARE) {
            self.rng.random_range(1_000..=50_000)
        } else {
            self.rng.random_range(0..=500)
        };
        record.focus_distance = self.rng.random_range(0.0..=MAX_FOCUS_DISTANCE);
        record
    }

    /// Spawn up to `count` agents into `engine`.
    ///
    /// Stops early when the pool is exhausted. Returns how many were placed.
    pub fn spawn_into<S: InferenceService>(
        &mut self,
        engine: &mut Engine<S>,
        count: usize,
    ) -> usize {
        let mut spawned: usize = 0;
        for _ in 0..count {
            let record = self.generate();
            let (agent, features, engagement) = (record.id, record.features, record.engagement);
            match engine.spawn(record) {
                Ok(_) => {
                    self.store.insert(agent, features, engagement);
                    spawned = spawned.saturating_add(1);
                }
                Err(PoolError::Exhausted { capacity }) => {
                    warn!(
                        capacity,
                        requested = count,
                        spawned,
                        "Agent pool exhausted, spawn stopped"
                    );
                    break;
                }
                Err(e) => warn!(%agent, error = %e, "Failed to spawn agent"),
            }
        }
        spawned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use throng_agents::DirtyTracker;
    use throng_core::{Collaborators, SimulationConfig, TracingTelemetry};
    use throng_inference::HeuristicInferenceService;
    use throng_types::HardwareClass;
    use tokio::runtime::Handle;

    use super::*;

    #[test]
    fn same_seed_same_population() {
        let store = Arc::new(InMemoryAttributeStore::new());
        let mut a = Spawner::new(7, 0.15, Arc::clone(&store));
        let mut b = Spawner::new(7, 0.15, store);
        for _ in 0..50 {
            assert_eq!(a.generate(), b.generate());
        }
    }

    #[test]
    fn generated_records_are_well_formed() {
        let mut spawner = Spawner::new(1, 1.0, Arc::new(InMemoryAttributeStore::new()));
        for expected in 0..200 {
            let record = spawner.generate();
            assert_eq!(record.id, AgentId::new(expected));
            assert!(record.is_well_formed());
            assert!(record.volatile);
            assert!((18..=90).contains(&record.features.age));
            assert!((0.0..=MAX_FOCUS_DISTANCE).contains(&record.focus_distance));
        }
    }

    #[tokio::test]
    async fn spawn_stops_at_pool_capacity() {
        let mut config = SimulationConfig::default();
        config.population.pool_capacity = 10;
        config.population.initial_agents = 10;
        let store = Arc::new(InMemoryAttributeStore::new());
        let mut engine = Engine::init(
            config,
            Arc::new(HeuristicInferenceService::new()),
            Handle::current(),
            HardwareClass::Mid,
            Collaborators {
                store: Arc::clone(&store) as _,
                gateway: Arc::new(DirtyTracker::new()),
                telemetry: Arc::new(TracingTelemetry),
            },
        )
        .unwrap();

        let mut spawner = Spawner::new(3, 0.0, Arc::clone(&store));
        assert_eq!(spawner.spawn_into(&mut engine, 25), 10);
        assert_eq!(engine.pool().live_count(), 10);
        assert_eq!(store.len(), 10);
    }
}
