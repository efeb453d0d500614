//! The composed engine: `init`, `tick`, `shutdown`.
//!
//! Each tick runs these phases in order:
//!
//! 1. **Advance** the clock.
//! 2. **Drain** completed inference batches into the cache and population.
//! 3. **Classify** tiers every `lod_update_interval` ticks.
//! 4. **Schedule** per-tier routines on the worker pool (parallel).
//! 5. **Select** representatives and serve or submit them every
//!    `selection_interval / inference_rate_multiplier` ticks.
//! 6. **Sweep** stale cache entries and reclaim pending pool slots every
//!    `sweep_interval_ticks`.
//! 7. **Compact** the pool free list every `compaction_interval_ticks`.
//! 8. **Control**: sample frame time and memory, run the adaptive check
//!    when due, and carry out its population adjustment.
//! 9. **Report** telemetry.
//!
//! Every phase except the scheduler runs on the calling thread, which makes
//! the tick the only mutator of the pool's free list, the cache and the
//! in-flight markers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use throng_agents::{
    AgentAttributeStore, AgentPool, PersistenceGateway, PoolError, RoutineConfig, SlotHandle,
};
use throng_inference::{
    BreakerState, CacheStats, CycleReport, DrainReport, InferencePipeline, InferenceService,
};
use throng_types::{
    AgentId, AgentRecord, ContentDescriptor, HardwareClass, RunId, Tier,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::adaptive::{
    AdaptiveController, AdaptiveState, ControlDecision, PopulationAdjustment, PopulationBounds,
};
use crate::classifier::{ClassificationReport, ClassifierSettings, TierClassifier};
use crate::clock::{ClockError, SimClock};
use crate::config::SimulationConfig;
use crate::scheduler::{ScheduleReport, SchedulerError, SchedulerSettings, TieredScheduler};
use crate::telemetry::{TelemetrySink, metrics};

/// Bytes per megabyte for memory samples.
const BYTES_PER_MB: f64 = 1_048_576.0;

/// Errors that can occur while building the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration was rejected.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: crate::config::ConfigError,
    },

    /// The clock could not be created.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The scheduler could not be created.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: SchedulerError,
    },
}

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Collaborators the engine writes through.
#[derive(Clone)]
pub struct Collaborators {
    /// Attribute store receiving influence deltas.
    pub store: Arc<dyn AgentAttributeStore>,
    /// Gateway receiving dirty marks.
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Telemetry destination.
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// Live agents at end of tick.
    pub live_agents: usize,
    /// Population per tier at end of tick, indexed by [`Tier::index`].
    pub tier_populations: [usize; Tier::COUNT],
    /// Inference completions folded in this tick.
    pub drain: DrainReport,
    /// Classification pass, if one ran.
    pub classification: Option<ClassificationReport>,
    /// Scheduler batches.
    pub schedule: ScheduleReport,
    /// Selection cycle, if one ran.
    pub inference: Option<CycleReport>,
    /// Cache entries swept.
    pub swept: usize,
    /// Pool slots reclaimed.
    pub reclaimed: usize,
    /// Adaptive check, if one ran.
    pub control: Option<ControlDecision>,
    /// Agents released by a shrink request.
    pub removed: Vec<AgentId>,
    /// Wall time of the tick.
    pub frame: Duration,
}

/// Outcome of [`Engine::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Ticks executed.
    pub ticks: u64,
    /// In-flight tickets released.
    pub released: usize,
    /// Pool slots reclaimed.
    pub reclaimed: usize,
    /// Live agents at shutdown.
    pub live_agents: usize,
}

/// The composed population engine.
pub struct Engine<S> {
    run_id: RunId,
    config: SimulationConfig,
    clock: SimClock,
    pool: AgentPool,
    classifier: TierClassifier,
    scheduler: TieredScheduler,
    adaptive: Arc<AdaptiveState>,
    controller: AdaptiveController,
    pipeline: InferencePipeline<S>,
    routines: RoutineConfig,
    collaborators: Collaborators,
    next_selection_tick: u64,
    pending_growth: usize,
}

impl<S> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("run_id", &self.run_id)
            .field("tick", &self.clock.tick())
            .field("live", &self.pool.live_count())
            .finish_non_exhaustive()
    }
}

impl<S: InferenceService> Engine<S> {
    /// Build every component from `config`.
    ///
    /// Inference calls are spawned on `runtime`; the adaptive state is
    /// seeded from `hardware`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the configuration is invalid or the
    /// worker pool cannot be created.
    pub fn init(
        config: SimulationConfig,
        service: Arc<S>,
        runtime: Handle,
        hardware: HardwareClass,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let clock = SimClock::new(config.world.ticks_per_day)?;
        let scheduler = TieredScheduler::new(SchedulerSettings::from_config(
            &config.scheduler,
            config.tiers.voters_per_frame,
        ))?;
        let adaptive = Arc::new(AdaptiveState::for_hardware(hardware));
        let controller = AdaptiveController::new(&config.adaptive, Arc::clone(&adaptive));
        let pipeline = InferencePipeline::new(
            &config.pipeline_settings(),
            service,
            runtime,
            Arc::clone(&collaborators.store),
            Arc::clone(&collaborators.gateway),
        );
        let run_id = RunId::new();

        info!(
            %run_id,
            world = %config.world.name,
            pool_capacity = config.population.pool_capacity,
            target_population = config.population.target_population,
            ?hardware,
            workers = scheduler.worker_count(),
            update_multiplier = adaptive.update_frequency_multiplier(),
            complexity = adaptive.tier_complexity_level(),
            "Engine initialized"
        );

        Ok(Self {
            run_id,
            clock,
            pool: AgentPool::with_capacity(config.population.pool_capacity),
            classifier: TierClassifier::new(ClassifierSettings::from_config(&config.tiers)),
            scheduler,
            adaptive,
            controller,
            pipeline,
            routines: config.routine_config(),
            collaborators,
            next_selection_tick: 0,
            pending_growth: 0,
            config,
        })
    }

    /// Place a new agent in the pool at the current tick.
    ///
    /// The agent starts Dormant until the next classification pass.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when the pool is full.
    pub fn spawn(&mut self, record: AgentRecord) -> Result<SlotHandle, PoolError> {
        let handle = self.pool.acquire(record.id, self.clock.tick())?;
        if let Err(err) = self.pool.activate(handle, record) {
            // Hand the slot back to the free list.
            let _ = self.pool.release(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// Mark an agent for removal; its slot is reclaimed by the next sweep.
    ///
    /// Returns `false` if the agent is not live.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidTransition`] if the slot cannot leave
    /// its current state.
    pub fn despawn(&mut self, agent: AgentId) -> Result<bool, PoolError> {
        let Some(handle) = self.pool.handle_of(agent) else {
            return Ok(false);
        };
        self.pool.mark_pending_destroy(handle)?;
        self.collaborators.gateway.mark_dirty(agent);
        Ok(true)
    }

    /// Run one classification pass immediately.
    pub fn classify_now(&mut self) -> ClassificationReport {
        self.classifier.classify(
            &mut self.pool,
            self.adaptive.tier_complexity_level(),
            self.clock.tick(),
        )
    }

    /// Execute one tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::Clock`] if the tick counter overflows.
    pub fn tick(&mut self, content: &ContentDescriptor) -> Result<TickSummary, TickError> {
        let started = Instant::now();
        let tick = self.clock.advance()?;

        let drain = self.pipeline.drain(&mut self.pool, tick);
        if drain.failed > 0 {
            warn!(
                tick,
                failed = drain.failed,
                breaker = %self.pipeline.breaker_state(),
                "Inference batches failed"
            );
        }

        let classification = self
            .clock
            .is_due(self.config.tiers.lod_update_interval)
            .then(|| self.classify_now());

        let schedule = self
            .scheduler
            .run(&mut self.pool, tick, &self.adaptive, &self.routines);

        let inference = (tick >= self.next_selection_tick).then(|| {
            let rate = self.adaptive.inference_rate_multiplier();
            let period = selection_period(self.config.inference.selection_interval_ticks, rate);
            self.next_selection_tick = tick.saturating_add(period);
            self.pipeline.run_cycle(&mut self.pool, content, tick, rate)
        });

        let (swept, reclaimed) = if self.clock.is_due(self.config.inference.sweep_interval_ticks) {
            (self.pipeline.sweep(tick), self.pool.reclaim_pending())
        } else {
            (0, 0)
        };

        if self
            .clock
            .is_due(self.config.population.compaction_interval_ticks)
        {
            self.pool.compact();
        }

        let frame = started.elapsed();
        self.controller.record_frame(frame.as_secs_f64() * 1_000.0);
        self.controller.record_memory(self.memory_mb());

        let now = Instant::now();
        let mut removed = Vec::new();
        let control = self.controller.due(now).then(|| {
            let bounds = self.population_bounds();
            let decision = self.controller.check(now, bounds);
            match decision.adjustment {
                PopulationAdjustment::Shrink(count) => removed = self.shed(count),
                PopulationAdjustment::Grow(count) => self.pending_growth = count,
                PopulationAdjustment::None => self.pending_growth = 0,
            }
            decision
        });

        let summary = TickSummary {
            tick,
            live_agents: self.pool.live_count(),
            tier_populations: self.pool.tier_populations(),
            drain,
            classification,
            schedule,
            inference,
            swept,
            reclaimed,
            control,
            removed,
            frame,
        };
        self.report(&summary);
        Ok(summary)
    }

    /// Wait for every outstanding inference call and fold it in.
    pub async fn settle_inference(&mut self) -> DrainReport {
        let tick = self.clock.tick();
        let mut total = DrainReport::default();
        while let Some(report) = self.pipeline.settle_one(&mut self.pool, tick).await {
            total.completions = total.completions.saturating_add(report.completions);
            total.failed = total.failed.saturating_add(report.failed);
            total.rejected = total.rejected.saturating_add(report.rejected);
            total.propagated = total.propagated.saturating_add(report.propagated);
            total.skipped = total.skipped.saturating_add(report.skipped);
        }
        total
    }

    /// Abort outstanding inference, release every marker, and reclaim
    /// pending slots.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let released = self.pipeline.shutdown(&mut self.pool);
        let reclaimed = self.pool.reclaim_pending();
        self.classifier.reset();
        self.scheduler.reset();
        let report = ShutdownReport {
            ticks: self.clock.tick(),
            released,
            reclaimed,
            live_agents: self.pool.live_count(),
        };
        info!(
            run_id = %self.run_id,
            ticks = report.ticks,
            released,
            reclaimed,
            live_agents = report.live_agents,
            cache_hit_ratio = self.pipeline.cache_stats().hit_ratio(),
            "Engine shut down"
        );
        report
    }

    /// Take the growth the controller last requested, resetting it.
    pub const fn take_growth_request(&mut self) -> usize {
        let requested = self.pending_growth;
        self.pending_growth = 0;
        requested
    }

    /// Current tick.
    pub const fn tick_count(&self) -> u64 {
        self.clock.tick()
    }

    /// Identifier of this run.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The agent pool.
    pub const fn pool(&self) -> &AgentPool {
        &self.pool
    }

    /// Mutable agent pool, for collaborators that update presentation hints.
    pub const fn pool_mut(&mut self) -> &mut AgentPool {
        &mut self.pool
    }

    /// The shared adaptive state.
    pub const fn adaptive(&self) -> &Arc<AdaptiveState> {
        &self.adaptive
    }

    /// The configuration the engine runs with.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Cache counters.
    pub const fn cache_stats(&self) -> CacheStats {
        self.pipeline.cache_stats()
    }

    /// Outstanding inference requests.
    pub fn inflight_count(&self) -> usize {
        self.pipeline.inflight_count()
    }

    /// Breaker state.
    pub const fn breaker_state(&self) -> BreakerState {
        self.pipeline.breaker_state()
    }

    /// Estimated resident memory of the pool and cache in megabytes.
    #[allow(clippy::cast_precision_loss)]
    pub fn memory_mb(&self) -> f64 {
        let bytes = self
            .pool
            .estimated_bytes()
            .saturating_add(self.pipeline.estimated_bytes());
        bytes as f64 / BYTES_PER_MB
    }

    fn population_bounds(&self) -> PopulationBounds {
        let pool_capacity = usize::try_from(self.pool.capacity()).unwrap_or(usize::MAX);
        PopulationBounds {
            live: self.pool.live_count(),
            target: usize::try_from(self.config.population.target_population).unwrap_or(usize::MAX),
            ceiling: self.classifier.settings().bounded_capacity().min(pool_capacity),
            step: usize::try_from(self.config.population.population_step).unwrap_or(usize::MAX),
        }
    }

    /// Release up to `count` agents, Dormant before Low, farthest first.
    /// Agents covered by an in-flight analysis are kept.
    fn shed(&mut self, count: usize) -> Vec<AgentId> {
        let mut victims: Vec<(Tier, f32, AgentId, SlotHandle)> = self
            .pool
            .live_slots()
            .filter(|slot| {
                matches!(slot.assignment().tier, Tier::Dormant | Tier::Low)
                    && slot.reference_count() == 0
            })
            .filter_map(|slot| {
                let record = slot.record()?;
                Some((slot.assignment().tier, slot.assignment().distance, record.id, slot.handle()))
            })
            .collect();
        victims.sort_unstable_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.total_cmp(&a.1))
                .then(b.2.cmp(&a.2))
        });

        let mut removed = Vec::with_capacity(count.min(victims.len()));
        for (_, _, agent, handle) in victims.into_iter().take(count) {
            match self.pool.mark_pending_destroy(handle) {
                Ok(()) => {
                    self.collaborators.gateway.mark_dirty(agent);
                    removed.push(agent);
                }
                Err(err) => warn!(%agent, error = %err, "Failed to release agent"),
            }
        }
        if !removed.is_empty() {
            info!(
                requested = count,
                released = removed.len(),
                live = self.pool.live_count(),
                "Population shrunk"
            );
        }
        removed
    }

    #[allow(clippy::cast_precision_loss)]
    fn report(&self, summary: &TickSummary) {
        let sink = &self.collaborators.telemetry;
        let population = |tier: Tier| {
            summary
                .tier_populations
                .get(tier.index())
                .copied()
                .unwrap_or(0) as f64
        };
        sink.record(metrics::TIER_HIGH, population(Tier::High));
        sink.record(metrics::TIER_MEDIUM, population(Tier::Medium));
        sink.record(metrics::TIER_LOW, population(Tier::Low));
        sink.record(metrics::TIER_DORMANT, population(Tier::Dormant));
        sink.record(metrics::LIVE_AGENTS, summary.live_agents as f64);
        sink.record(metrics::FRAME_MS, summary.frame.as_secs_f64() * 1_000.0);
        sink.record(
            metrics::BATCH_MS,
            summary.schedule.elapsed.as_secs_f64() * 1_000.0,
        );
        sink.record(metrics::UPDATED, summary.schedule.updated() as f64);
        sink.record(metrics::MEMORY_MB, self.memory_mb());
        sink.record(metrics::CACHE_HIT_RATIO, self.pipeline.cache_stats().hit_ratio());
        sink.record(metrics::CACHE_ENTRIES, self.pipeline.cache_len() as f64);
        sink.record(metrics::INFLIGHT, self.pipeline.inflight_count() as f64);
        sink.record(
            metrics::BREAKER_STATE,
            f64::from(self.pipeline.breaker_state().code()),
        );
        sink.record(
            metrics::UPDATE_MULTIPLIER,
            f64::from(self.adaptive.update_frequency_multiplier()),
        );
        sink.record(
            metrics::INFERENCE_MULTIPLIER,
            f64::from(self.adaptive.inference_rate_multiplier()),
        );

        debug!(
            tick = summary.tick,
            live = summary.live_agents,
            updated = summary.schedule.updated(),
            frame_us = u64::try_from(summary.frame.as_micros()).unwrap_or(u64::MAX),
            "Tick complete"
        );
    }
}

/// Ticks between selection cycles at an inference-rate multiplier.
///
/// `ceil(interval / rate)`, at least one tick.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn selection_period(interval: u64, rate: f32) -> u64 {
    let rate = f64::from(rate);
    if rate <= 0.0 || !rate.is_finite() {
        return interval.max(1);
    }
    let period = (interval as f64 / rate).ceil();
    if period.is_finite() && period >= 1.0 {
        period as u64
    } else {
        1
    }
}
