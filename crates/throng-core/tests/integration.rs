//! Integration tests for the composed engine.
//!
//! Every test runs against the in-memory collaborators and the offline
//! heuristic analyzer, so nothing here needs network access.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::arithmetic_side_effects
)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use throng_agents::{AgentPool, DirtyTracker, InMemoryAttributeStore};
use throng_core::config::AdaptiveConfig;
use throng_core::telemetry::metrics;
use throng_core::{
    AdaptiveController, AdaptiveState, Collaborators, Engine, MemoryTelemetry, NoOpCallback,
    PopulationAdjustment, PopulationBounds, RotatingFeed, RunControl, SimulationConfig,
    SimulationEndReason, TickCallback, TickSummary, run_simulation,
};
use throng_inference::{
    BreakerState, HeuristicInferenceService, InferenceError, InferenceService,
};
use throng_types::{
    AgentId, AgentProfile, AgentRecord, AnalysisResult, ContentDescriptor, FeatureVector,
    HardwareClass, PerformanceState, Tier,
};
use tokio::runtime::Handle;

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    engine: Engine<HeuristicInferenceService>,
    store: Arc<InMemoryAttributeStore>,
    dirty: Arc<DirtyTracker>,
    telemetry: Arc<MemoryTelemetry>,
}

/// A configuration whose adaptive thresholds no test machine can reach,
/// so the controller never sheds load on its own.
fn calm_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.adaptive.target_frame_ms = 60_000.0;
    config.adaptive.critical_frame_ms = 120_000.0;
    config.population.target_population = config.population.pool_capacity;
    config
}

fn harness(config: SimulationConfig) -> Harness {
    let store = Arc::new(InMemoryAttributeStore::new());
    let dirty = Arc::new(DirtyTracker::new());
    let telemetry = Arc::new(MemoryTelemetry::new());
    let engine = Engine::init(
        config,
        Arc::new(HeuristicInferenceService::new()),
        Handle::current(),
        HardwareClass::High,
        Collaborators {
            store: Arc::clone(&store) as _,
            gateway: Arc::clone(&dirty) as _,
            telemetry: Arc::clone(&telemetry) as _,
        },
    )
    .expect("engine should build from a valid config");
    Harness {
        engine,
        store,
        dirty,
        telemetry,
    }
}

/// Backend that refuses every call.
struct Unreachable;

impl InferenceService for Unreachable {
    fn analyze(
        &self,
        _content: &ContentDescriptor,
        _profiles: &[AgentProfile],
    ) -> impl Future<Output = Result<Vec<AnalysisResult>, InferenceError>> + Send {
        std::future::ready(Err(InferenceError::Transport("connection refused".to_owned())))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

fn engine_with<S: InferenceService>(config: SimulationConfig, service: S) -> Engine<S> {
    Engine::init(
        config,
        Arc::new(service),
        Handle::current(),
        HardwareClass::High,
        Collaborators {
            store: Arc::new(InMemoryAttributeStore::new()),
            gateway: Arc::new(DirtyTracker::new()),
            telemetry: Arc::new(MemoryTelemetry::new()),
        },
    )
    .expect("engine should build from a valid config")
}

fn record(id: u64, age: u8, education: u8, urban: bool, focus: f32) -> AgentRecord {
    let mut record = AgentRecord::new(
        AgentId::new(id),
        FeatureVector {
            age,
            education,
            urban,
            economic_axis: 0.1,
            social_axis: 0.1,
        },
    );
    record.engagement = 0.6;
    record.focus_distance = focus;
    record
}

fn content() -> ContentDescriptor {
    ContentDescriptor::new("housing", "The city council proposes a freeze on rent increases.")
}

fn assert_populations_consistent(summary: &TickSummary, caps: [usize; Tier::COUNT]) {
    let total: usize = summary.tier_populations.iter().sum();
    assert_eq!(total, summary.live_agents, "tiers must partition the live set");
    for tier in [Tier::Low, Tier::Medium, Tier::High] {
        assert!(
            summary.tier_populations[tier.index()] <= caps[tier.index()],
            "{tier} over capacity at tick {}",
            summary.tick
        );
    }
}

// =============================================================================
// Tier capacity
// =============================================================================

#[tokio::test]
async fn full_pool_respects_tier_caps_every_pass() {
    let mut config = calm_config();
    config.tiers.lod_update_interval = 1;
    let mut h = harness(config);

    // Every agent is close enough for High; the caps alone decide the split.
    for id in 0..12_000 {
        h.engine.spawn(record(id, 30, 2, true, 10.0)).unwrap();
    }
    assert!(h.engine.spawn(record(12_000, 30, 2, true, 10.0)).is_err());

    let caps = [usize::MAX, 7_500, 2_000, 500];
    for _ in 0..3 {
        let summary = h.engine.tick(&content()).unwrap();
        assert!(summary.classification.is_some());
        assert_eq!(summary.live_agents, 12_000);
        assert_eq!(summary.tier_populations, [2_000, 7_500, 2_000, 500]);
        assert_populations_consistent(&summary, caps);
    }
}

#[tokio::test]
async fn new_agents_wait_in_dormant_until_classified() {
    let mut h = harness(calm_config());
    for id in 0..20 {
        h.engine.spawn(record(id, 30, 2, true, 10.0)).unwrap();
    }
    assert_eq!(h.engine.pool().tier_populations(), [20, 0, 0, 0]);

    let report = h.engine.classify_now();
    assert_eq!(report.classified, 20);
    assert_eq!(report.populations, [0, 0, 0, 20]);
}

// =============================================================================
// Representative sampling and propagation
// =============================================================================

/// 1000 agents spread evenly over 40 distinct clusters.
fn spawn_clustered(h: &mut Harness) {
    const AGES: [u8; 5] = [20, 30, 40, 55, 70];
    for id in 0..1_000_u64 {
        let cluster = (id % 40) as usize;
        let age = AGES[cluster % 5];
        let education = ((cluster / 5) % 4) as u8;
        let urban = cluster >= 20;
        let agent = record(id, age, education, urban, 10.0);
        h.store.insert(agent.id, agent.features, agent.engagement);
        h.engine.spawn(agent).unwrap();
    }
}

#[tokio::test]
async fn one_representative_per_cluster_and_members_get_reduced_strength() {
    let mut config = calm_config();
    config.inference.batch_ceiling = 50;
    let mut h = harness(config);
    spawn_clustered(&mut h);
    h.engine.classify_now();

    let summary = h.engine.tick(&content()).unwrap();
    let cycle = summary.inference.expect("selection runs on the first tick");
    assert_eq!(cycle.representatives, 40);
    assert_eq!(cycle.submitted, 40);
    assert_eq!(cycle.cache_hits, 0);
    assert_eq!(cycle.batches, 4);
    assert_eq!(h.engine.inflight_count(), 40);

    let drained = h.engine.settle_inference().await;
    assert_eq!(drained.completions, 4);
    assert_eq!(drained.failed, 0);
    assert_eq!(drained.propagated, 1_000);
    assert_eq!(h.engine.inflight_count(), 0);

    // Ties on engagement go to the lowest id, so agent 0 represents
    // cluster 0 and agent 40 is one of its members.
    let rep = h.engine.pool().record(AgentId::new(0)).unwrap();
    let member = h.engine.pool().record(AgentId::new(40)).unwrap();
    assert_eq!(rep.last_inference_tick, Some(1));
    assert_eq!(member.last_inference_tick, Some(1));
    assert!(!member.analysis_in_progress);
    assert!(member.cached_confidence > 0.0);
    assert!(member.cached_confidence < rep.cached_confidence);

    assert_eq!(h.store.deltas_applied(AgentId::new(40)), 1);
    assert_eq!(h.dirty.len(), 1_000);
    for slot in h.engine.pool().live_slots() {
        assert_eq!(slot.reference_count(), 0);
    }
}

#[tokio::test]
async fn second_cycle_skips_freshly_analysed_agents() {
    let mut config = calm_config();
    config.inference.selection_interval_ticks = 1;
    let mut h = harness(config);
    spawn_clustered(&mut h);
    h.engine.classify_now();

    h.engine.tick(&content()).unwrap();
    h.engine.settle_inference().await;

    let summary = h.engine.tick(&content()).unwrap();
    let cycle = summary.inference.expect("selection runs every tick");
    assert_eq!(cycle.representatives, 0);
    assert_eq!(cycle.submitted, 0);
}

// =============================================================================
// Adaptive control
// =============================================================================

#[test]
fn sustained_slow_frames_drive_multiplier_to_floor() {
    let config = AdaptiveConfig::default();
    let state = Arc::new(AdaptiveState::for_hardware(HardwareClass::High));
    let mut controller = AdaptiveController::new(&config, Arc::clone(&state));
    for _ in 0..config.frame_history {
        controller.record_frame(40.0);
    }
    controller.record_memory(64.0);

    let bounds = PopulationBounds {
        live: 10_000,
        target: 10_000,
        ceiling: 10_000,
        step: 250,
    };
    let start = Instant::now();
    let mut previous = state.update_frequency_multiplier();
    for check in 1..=3_u32 {
        let now = start + Duration::from_millis(config.check_interval_ms) * check;
        let decision = controller.check(now, bounds);
        assert_eq!(decision.state, PerformanceState::Critical);
        // Already at target: the multipliers shed load, the population stays.
        assert_eq!(decision.adjustment, PopulationAdjustment::None);
        assert!(decision.update_frequency_multiplier < previous);
        previous = decision.update_frequency_multiplier;
    }
    assert!((previous - config.multiplier_floor).abs() < f32::EPSILON);
    assert_eq!(state.tier_complexity_level(), 0);
    assert!(!state.advanced_behaviors_enabled());
}

#[tokio::test]
async fn memory_pressure_sheds_dormant_agents() {
    let mut config = SimulationConfig::default();
    config.adaptive.target_frame_ms = 60_000.0;
    config.adaptive.critical_frame_ms = 120_000.0;
    config.adaptive.memory_warning_mb = 0.000_1;
    config.adaptive.memory_critical_mb = 0.001;
    config.population.target_population = 900;
    config.population.population_step = 50;
    let mut h = harness(config);
    for id in 0..1_000 {
        h.engine.spawn(record(id, 30, 2, true, 10.0)).unwrap();
    }

    // Nothing is classified yet, so every agent is Dormant and unreferenced.
    let summary = h.engine.tick(&content()).unwrap();
    let control = summary.control.expect("the first tick runs a check");
    assert_eq!(control.state, PerformanceState::Critical);
    assert_eq!(control.adjustment, PopulationAdjustment::Shrink(100));
    assert_eq!(summary.removed.len(), 100);
    assert_eq!(summary.live_agents, 900);
    for agent in &summary.removed {
        assert!(h.engine.pool().record(*agent).is_none());
    }

    let report = h.engine.shutdown();
    assert_eq!(report.reclaimed, 100);
    assert_eq!(h.engine.pool().free_count(), 11_100);
}

#[tokio::test]
async fn sustained_memory_pressure_stops_shedding_at_target() {
    let mut config = SimulationConfig::default();
    config.adaptive.target_frame_ms = 60_000.0;
    config.adaptive.critical_frame_ms = 120_000.0;
    config.adaptive.memory_warning_mb = 0.000_1;
    config.adaptive.memory_critical_mb = 0.001;
    config.adaptive.check_interval_ms = 0;
    config.population.target_population = 900;
    config.population.population_step = 50;
    let mut h = harness(config);
    for id in 0..1_000 {
        h.engine.spawn(record(id, 30, 2, true, 10.0)).unwrap();
    }

    let first = h.engine.tick(&content()).unwrap();
    assert_eq!(first.live_agents, 900);
    let memory_at_target = h.engine.memory_mb();

    for _ in 0..5 {
        let summary = h.engine.tick(&content()).unwrap();
        let control = summary.control.expect("checks run every tick");
        assert_eq!(control.state, PerformanceState::Critical);
        assert_eq!(control.adjustment, PopulationAdjustment::None);
        assert!(summary.removed.is_empty());
        assert_eq!(summary.live_agents, 900);
    }
    assert!(memory_at_target > 0.0);
}

#[tokio::test]
async fn shedding_lowers_the_memory_reading() {
    let mut config = calm_config();
    config.population.target_population = 900;
    let mut h = harness(config);
    for id in 0..1_000 {
        h.engine.spawn(record(id, 30, 2, true, 10.0)).unwrap();
    }
    let full = h.engine.memory_mb();
    for id in 0..100 {
        assert!(h.engine.despawn(AgentId::new(id)).unwrap());
    }
    let shed = h.engine.memory_mb();
    assert!(shed < full, "{shed} MB should be below {full} MB");
}

#[test]
fn tail_latency_alone_raises_a_warning() {
    let config = AdaptiveConfig::default();
    let state = Arc::new(AdaptiveState::for_hardware(HardwareClass::High));
    let mut controller = AdaptiveController::new(&config, Arc::clone(&state));
    // 56 quick frames and 4 stalls: the average stays well under target,
    // the 95th percentile lands on a stall.
    for _ in 0..56 {
        controller.record_frame(5.0);
    }
    for _ in 0..4 {
        controller.record_frame(50.0);
    }
    controller.record_memory(64.0);

    let start = Instant::now();
    let above = controller.check(
        start,
        PopulationBounds {
            live: 10_100,
            target: 10_000,
            ceiling: 10_000,
            step: 250,
        },
    );
    assert!(above.frame_avg_ms < config.target_frame_ms);
    assert!(above.frame_p95_ms > config.critical_frame_ms);
    assert_eq!(above.state, PerformanceState::Warning);
    assert_eq!(above.adjustment, PopulationAdjustment::Shrink(100));
    assert!((above.update_frequency_multiplier - config.warning_factor).abs() < 1e-6);
    assert!(state.advanced_behaviors_enabled());

    let at_target = controller.check(
        start + Duration::from_millis(config.check_interval_ms),
        PopulationBounds {
            live: 10_000,
            target: 10_000,
            ceiling: 10_000,
            step: 250,
        },
    );
    assert_eq!(at_target.state, PerformanceState::Warning);
    assert_eq!(at_target.adjustment, PopulationAdjustment::None);
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[tokio::test]
async fn aborted_probe_lets_a_later_cycle_probe_again() {
    let mut config = calm_config();
    config.inference.selection_interval_ticks = 1;
    config.inference.breaker_failure_threshold = 1;
    config.inference.breaker_recovery_ms = 0;
    let mut engine = engine_with(config, Unreachable);
    for id in 0..10 {
        engine.spawn(record(id, 30, 2, true, 10.0)).unwrap();
    }
    engine.classify_now();

    let first = engine.tick(&content()).unwrap();
    assert_eq!(first.inference.expect("selection runs every tick").batches, 1);
    assert_eq!(engine.settle_inference().await.failed, 1);
    assert_eq!(engine.breaker_state(), BreakerState::Open);

    let probe = engine.tick(&content()).unwrap();
    assert_eq!(probe.inference.expect("selection runs every tick").batches, 1);
    assert_eq!(engine.breaker_state(), BreakerState::HalfOpen);

    // The probe's outcome is dropped with the abort.
    engine.shutdown();
    assert_eq!(engine.inflight_count(), 0);

    let retry = engine.tick(&content()).unwrap();
    let cycle = retry.inference.expect("selection runs every tick");
    assert_eq!(cycle.blocked, 0);
    assert_eq!(cycle.batches, 1);
    assert_eq!(engine.inflight_count(), 1);
}

// =============================================================================
// Pool lifecycle through the engine
// =============================================================================

#[tokio::test]
async fn despawned_slot_is_reused_with_a_new_generation() {
    let mut h = harness(calm_config());
    let first = h.engine.spawn(record(1, 30, 2, true, 10.0)).unwrap();
    assert!(h.engine.despawn(AgentId::new(1)).unwrap());
    assert!(!h.engine.despawn(AgentId::new(1)).unwrap());
    assert_eq!(h.engine.pool().live_count(), 0);

    assert_eq!(h.engine.shutdown().reclaimed, 1);
    let second = h.engine.spawn(record(2, 30, 2, true, 10.0)).unwrap();
    assert_eq!(second.index(), first.index());
    assert_ne!(second.generation(), first.generation());
    assert!(h.engine.pool().get(first).is_none());
    assert!(h.engine.pool().get(second).is_some());
}

#[test]
fn stale_handles_are_rejected_by_the_pool() {
    let mut pool = AgentPool::with_capacity(2);
    let handle = pool.acquire(AgentId::new(1), 0).unwrap();
    pool.activate(handle, record(1, 30, 2, true, 1.0)).unwrap();
    pool.retain(handle).unwrap();
    pool.mark_pending_destroy(handle).unwrap();

    // Still referenced by an analysis: not reclaimable yet.
    assert_eq!(pool.reclaim_pending(), 0);
    pool.unretain(handle).unwrap();
    assert_eq!(pool.reclaim_pending(), 1);

    let reused = pool.acquire(AgentId::new(2), 5).unwrap();
    assert_eq!(reused.index(), handle.index());
    assert!(pool.activate(handle, record(2, 30, 2, true, 1.0)).is_err());
    assert!(pool.activate(reused, record(2, 30, 2, true, 1.0)).is_ok());
}

// =============================================================================
// Run loop
// =============================================================================

#[derive(Default)]
struct Recorder {
    ticks: Vec<u64>,
    classified: usize,
}

impl<S> TickCallback<S> for Recorder {
    fn on_tick(&mut self, summary: &TickSummary, _engine: &mut Engine<S>) {
        self.ticks.push(summary.tick);
        if summary.classification.is_some() {
            self.classified += 1;
        }
        assert_populations_consistent(summary, [usize::MAX, 7_500, 2_000, 500]);
    }
}

#[tokio::test]
async fn run_loop_reports_telemetry_every_tick() {
    let mut config = calm_config();
    config.world.max_ticks = 25;
    config.world.tick_interval_ms = 0;
    let mut h = harness(config);
    for id in 0..200 {
        h.engine
            .spawn(record(id, 30, 2, id % 2 == 0, (id % 60) as f32 * 10.0))
            .unwrap();
    }

    let control = Arc::new(RunControl::from_config(&h.engine.config().world));
    let mut feed = RotatingFeed::from_config(&h.engine.config().content);
    let mut recorder = Recorder::default();
    let result = run_simulation(&mut h.engine, &control, &mut feed, &mut recorder)
        .await
        .unwrap();

    assert_eq!(result.end_reason, SimulationEndReason::MaxTicksReached);
    assert_eq!(result.total_ticks, 25);
    assert_eq!(recorder.ticks, (1..=25).collect::<Vec<_>>());
    assert_eq!(recorder.classified, 2);

    assert_eq!(h.telemetry.values(metrics::LIVE_AGENTS).len(), 25);
    assert_eq!(h.telemetry.last(metrics::LIVE_AGENTS), Some(200.0));
    let populated: f64 = [
        metrics::TIER_HIGH,
        metrics::TIER_MEDIUM,
        metrics::TIER_LOW,
        metrics::TIER_DORMANT,
    ]
    .iter()
    .filter_map(|name| h.telemetry.last(name))
    .sum();
    assert_eq!(populated, 200.0);

    h.engine.settle_inference().await;
    let report = h.engine.shutdown();
    assert_eq!(report.ticks, 25);
    assert_eq!(report.live_agents, 200);
    assert_eq!(h.engine.inflight_count(), 0);
}

#[tokio::test]
async fn stop_request_ends_the_run_before_the_next_tick() {
    let mut h = harness(calm_config());
    let control = Arc::new(RunControl::new(0, 0, 0));
    control.request_stop();
    let mut feed = RotatingFeed::from_config(&h.engine.config().content);
    let result = run_simulation(&mut h.engine, &control, &mut feed, &mut NoOpCallback)
        .await
        .unwrap();
    assert_eq!(result.end_reason, SimulationEndReason::StopRequested);
    assert_eq!(result.total_ticks, 0);
    assert_eq!(h.engine.tick_count(), 0);
}
