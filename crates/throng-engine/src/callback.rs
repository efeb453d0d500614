//! Tick callback that keeps the collaborators in step with the engine.
//!
//! After each tick this callback forgets agents the controller shed,
//! fulfils any growth the controller asked for, and once per simulated
//! day flushes the dirty set and logs a population report.

use std::sync::Arc;

use throng_agents::{DirtyTracker, InMemoryAttributeStore};
use throng_core::{Engine, TickCallback, TickSummary};
use throng_inference::InferenceService;
use throng_types::Tier;
use tracing::{debug, info};

use crate::spawner::Spawner;

/// Callback that bridges the tick loop to the spawner and collaborators.
#[derive(Debug)]
pub struct PopulationCallback {
    spawner: Spawner,
    store: Arc<InMemoryAttributeStore>,
    dirty: Arc<DirtyTracker>,
    report_interval: u64,
}

impl PopulationCallback {
    /// Create a callback that reports every `report_interval` ticks.
    pub const fn new(
        spawner: Spawner,
        store: Arc<InMemoryAttributeStore>,
        dirty: Arc<DirtyTracker>,
        report_interval: u64,
    ) -> Self {
        Self {
            spawner,
            store,
            dirty,
            report_interval,
        }
    }
}

impl<S: InferenceService> TickCallback<S> for PopulationCallback {
    fn on_tick(&mut self, summary: &TickSummary, engine: &mut Engine<S>) {
        for agent in &summary.removed {
            self.store.remove(*agent);
        }

        let requested = engine.take_growth_request();
        if requested > 0 {
            let spawned = self.spawner.spawn_into(engine, requested);
            info!(
                tick = summary.tick,
                requested,
                spawned,
                live = engine.pool().live_count(),
                "Population grown"
            );
        }

        let report_due = summary
            .tick
            .checked_rem(self.report_interval)
            .is_some_and(|r| r == 0);
        if !report_due {
            return;
        }

        // Stands in for the save the persistence layer would run.
        let flushed = self.dirty.drain().len();
        debug!(tick = summary.tick, flushed, "Flushed dirty agents");

        let population = |tier: Tier| {
            summary
                .tier_populations
                .get(tier.index())
                .copied()
                .unwrap_or(0)
        };
        info!(
            tick = summary.tick,
            day = summary.tick.checked_div(self.report_interval).unwrap_or(0),
            live = summary.live_agents,
            high = population(Tier::High),
            medium = population(Tier::Medium),
            low = population(Tier::Low),
            dormant = population(Tier::Dormant),
            updated = summary.schedule.updated(),
            cache_hit_ratio = engine.cache_stats().hit_ratio(),
            inflight = engine.inflight_count(),
            breaker = %engine.breaker_state(),
            update_multiplier = engine.adaptive().update_frequency_multiplier(),
            "Population report"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use throng_agents::AgentAttributeStore;
    use throng_core::{Collaborators, SimulationConfig, TracingTelemetry};
    use throng_inference::HeuristicInferenceService;
    use throng_types::{ContentDescriptor, HardwareClass};
    use tokio::runtime::Handle;

    use super::*;

    struct Setup {
        engine: Engine<HeuristicInferenceService>,
        callback: PopulationCallback,
        store: Arc<InMemoryAttributeStore>,
    }

    fn setup(config: SimulationConfig, initial: usize) -> Setup {
        let store = Arc::new(InMemoryAttributeStore::new());
        let dirty = Arc::new(DirtyTracker::new());
        let mut engine = Engine::init(
            config,
            Arc::new(HeuristicInferenceService::new()),
            Handle::current(),
            HardwareClass::High,
            Collaborators {
                store: Arc::clone(&store) as _,
                gateway: Arc::clone(&dirty) as _,
                telemetry: Arc::new(TracingTelemetry),
            },
        )
        .unwrap();
        let mut spawner = Spawner::new(11, 0.1, Arc::clone(&store));
        assert_eq!(spawner.spawn_into(&mut engine, initial), initial);
        Setup {
            engine,
            callback: PopulationCallback::new(spawner, Arc::clone(&store), dirty, 240),
            store,
        }
    }

    fn relaxed_frames(config: &mut SimulationConfig) {
        config.adaptive.target_frame_ms = 60_000.0;
        config.adaptive.critical_frame_ms = 120_000.0;
    }

    #[tokio::test]
    async fn growth_request_is_spawned() {
        let mut config = SimulationConfig::default();
        relaxed_frames(&mut config);
        config.population.population_step = 40;
        let mut s = setup(config, 100);

        let summary = s.engine.tick(&ContentDescriptor::new("t", "x")).unwrap();
        s.callback.on_tick(&summary, &mut s.engine);
        assert_eq!(s.engine.pool().live_count(), 140);
        assert_eq!(s.store.len(), 140);
        assert_eq!(s.engine.take_growth_request(), 0);
    }

    #[tokio::test]
    async fn shed_agents_leave_the_store() {
        let mut config = SimulationConfig::default();
        relaxed_frames(&mut config);
        config.adaptive.memory_warning_mb = 0.000_1;
        config.adaptive.memory_critical_mb = 0.001;
        config.population.target_population = 80;
        config.population.population_step = 10;
        let mut s = setup(config, 100);

        let summary = s.engine.tick(&ContentDescriptor::new("t", "x")).unwrap();
        assert_eq!(summary.removed.len(), 20);
        s.callback.on_tick(&summary, &mut s.engine);
        assert_eq!(s.store.len(), 80);
        for agent in &summary.removed {
            assert!(s.store.influence_score(*agent).is_none());
        }
    }
}
