//! Tiered scheduling of per-agent update routines.
//!
//! Each tick the scheduler takes a bounded sub-batch from every tier,
//! `voters_per_frame[tier] × update_frequency_multiplier` agents (at least
//! one when the tier is non-empty), walking a per-tier round-robin offset so
//! every agent is eventually covered. The chosen slots are marked in a
//! schedule vector indexed by slot, and the slot array is walked with
//! `par_iter_mut` zipped against it on a dedicated rayon pool. Slots are
//! independent, so there is no locking inside a batch.
//!
//! All tier batches complete before [`TieredScheduler::run`] returns.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use throng_agents::{AgentError, AgentPool, RoutineConfig, RoutineContext, SocialField, run_routine};
use throng_types::{AgentId, Tier};
use tracing::{debug, warn};

use crate::adaptive::AdaptiveState;
use crate::config::{SchedulerConfig, VotersPerFrame};

/// Errors that can occur while setting up the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The worker thread pool could not be created.
    #[error("failed to build worker pool: {source}")]
    ThreadPool {
        /// The underlying rayon error.
        #[from]
        source: rayon::ThreadPoolBuildError,
    },
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    /// Per-tier quotas at multiplier `1.0`.
    pub voters_per_frame: VotersPerFrame,
    /// Worker threads (0 = available parallelism).
    pub worker_threads: usize,
    /// Budget for all tier batches of one tick.
    pub frame_budget: Duration,
    /// Smallest parallel split length.
    pub min_batch: usize,
    /// Largest parallel split length.
    pub max_batch: usize,
}

impl SchedulerSettings {
    /// Settings from the `scheduler` section and the tier quotas.
    pub fn from_config(scheduler: &SchedulerConfig, voters_per_frame: VotersPerFrame) -> Self {
        Self {
            voters_per_frame,
            worker_threads: scheduler.worker_threads,
            frame_budget: Duration::from_secs_f64(scheduler.frame_budget_ms.max(0.0) / 1_000.0),
            min_batch: scheduler.min_batch.max(1),
            max_batch: scheduler.max_batch.max(scheduler.min_batch.max(1)),
        }
    }
}

/// Adapts the parallel split length to the observed batch time.
///
/// The granularity doubles after a tick whose batches exceeded the frame
/// budget and halves after one that used less than half of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizer {
    granularity: usize,
    min: usize,
    max: usize,
    budget: Duration,
}

impl BatchSizer {
    /// Create a sizer starting at `min`.
    pub fn new(min: usize, max: usize, budget: Duration) -> Self {
        let min = min.max(1);
        Self {
            granularity: min,
            min,
            max: max.max(min),
            budget,
        }
    }

    /// Current granularity.
    pub const fn granularity(&self) -> usize {
        self.granularity
    }

    /// Split length for `scheduled` agents over `workers` threads.
    ///
    /// Never coarser than an even share per worker, so small batches still
    /// spread across the pool.
    pub fn split_len(&self, scheduled: usize, workers: usize) -> usize {
        let share = scheduled.div_ceil(workers.max(1)).max(1);
        self.granularity.min(share)
    }

    /// Feed back the time the last tick's batches took.
    pub fn observe(&mut self, elapsed: Duration) {
        if elapsed > self.budget {
            self.granularity = self.granularity.saturating_mul(2).min(self.max);
        } else if elapsed.saturating_mul(2) < self.budget {
            self.granularity = self.granularity.checked_div(2).unwrap_or(0).max(self.min);
        }
    }
}

/// Timing and outcome of one tier's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierBatch {
    /// Agents scheduled.
    pub scheduled: usize,
    /// Agents updated successfully.
    pub updated: usize,
    /// Agents skipped after a routine failure.
    pub skipped: usize,
    /// Wall time of the batch.
    pub elapsed: Duration,
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Per-tier batches, indexed by [`Tier::index`].
    pub batches: [TierBatch; Tier::COUNT],
    /// Wall time of all batches.
    pub elapsed: Duration,
    /// Split length used this tick.
    pub split_len: usize,
}

impl ScheduleReport {
    /// Batch for `tier`.
    pub fn batch(&self, tier: Tier) -> TierBatch {
        self.batches.get(tier.index()).copied().unwrap_or_default()
    }

    /// Agents updated across all tiers.
    pub fn updated(&self) -> usize {
        self.batches
            .iter()
            .map(|b| b.updated)
            .fold(0, usize::saturating_add)
    }

    /// Agents skipped across all tiers.
    pub fn skipped(&self) -> usize {
        self.batches
            .iter()
            .map(|b| b.skipped)
            .fold(0, usize::saturating_add)
    }
}

/// Runs tier routines on a fixed-size worker pool.
#[derive(Debug)]
pub struct TieredScheduler {
    settings: SchedulerSettings,
    workers: rayon::ThreadPool,
    offsets: [usize; Tier::COUNT],
    sizer: BatchSizer,
    schedule: Vec<bool>,
}

impl TieredScheduler {
    /// Create a scheduler and its worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ThreadPool`] if the worker threads cannot
    /// be spawned.
    pub fn new(settings: SchedulerSettings) -> Result<Self, SchedulerError> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("throng-worker-{i}"));
        if settings.worker_threads > 0 {
            builder = builder.num_threads(settings.worker_threads);
        }
        let workers = builder.build()?;
        debug!(threads = workers.current_num_threads(), "Scheduler worker pool ready");
        Ok(Self {
            sizer: BatchSizer::new(settings.min_batch, settings.max_batch, settings.frame_budget),
            settings,
            workers,
            offsets: [0; Tier::COUNT],
            schedule: Vec::new(),
        })
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.current_num_threads()
    }

    /// Current batch granularity.
    pub const fn granularity(&self) -> usize {
        self.sizer.granularity()
    }

    /// Reset the round-robin offsets.
    pub const fn reset(&mut self) {
        self.offsets = [0; Tier::COUNT];
    }

    /// Quota for a tier holding `population` agents.
    pub fn quota(&self, tier: Tier, population: usize, multiplier: f32) -> usize {
        if population == 0 {
            return 0;
        }
        let voters = self.settings.voters_per_frame.for_tier(tier);
        scaled_quota(voters, multiplier).clamp(1, population)
    }

    /// Run one tick's batches for every tier.
    pub fn run(
        &mut self,
        pool: &mut AgentPool,
        tick: u64,
        adaptive: &AdaptiveState,
        routines: &RoutineConfig,
    ) -> ScheduleReport {
        let started = Instant::now();
        let multiplier = adaptive.update_frequency_multiplier();
        let advanced = adaptive.advanced_behaviors_enabled();

        let mut members: [Vec<u32>; Tier::COUNT] = Default::default();
        for slot in pool.live_slots() {
            if let Some(list) = members.get_mut(slot.assignment().tier.index()) {
                list.push(slot.index());
            }
        }

        let social = if advanced
            && members
                .get(Tier::High.index())
                .is_some_and(|high| !high.is_empty())
        {
            SocialField::build(pool.live_slots().filter_map(|slot| slot.record()))
        } else {
            SocialField::default()
        };

        let mut quotas = [0_usize; Tier::COUNT];
        for tier in Tier::DESCENDING {
            let population = members.get(tier.index()).map_or(0, Vec::len);
            if let Some(quota) = quotas.get_mut(tier.index()) {
                *quota = self.quota(tier, population, multiplier);
            }
        }
        let total = quotas.iter().copied().fold(0, usize::saturating_add);
        let split_len = self.sizer.split_len(total, self.worker_count());
        let ctx = RoutineContext {
            tick,
            config: routines,
            social: &social,
            advanced,
        };

        let mut report = ScheduleReport {
            split_len,
            ..ScheduleReport::default()
        };
        self.schedule.resize(pool.slots().len(), false);

        for tier in Tier::DESCENDING {
            let Some(list) = members.get(tier.index()) else {
                continue;
            };
            let quota = quotas.get(tier.index()).copied().unwrap_or(0);
            if quota == 0 {
                continue;
            }
            self.schedule.fill(false);
            let offset = self.offsets.get(tier.index()).copied().unwrap_or(0);
            let start = offset.checked_rem(list.len()).unwrap_or(0);
            for index in list.iter().cycle().skip(start).take(quota) {
                if let Some(flag) = self.schedule.get_mut(slot_index(*index)) {
                    *flag = true;
                }
            }
            if let Some(next) = self.offsets.get_mut(tier.index()) {
                *next = start.saturating_add(quota).checked_rem(list.len()).unwrap_or(0);
            }

            let batch_started = Instant::now();
            let schedule = &self.schedule;
            let failures: Vec<(AgentId, AgentError)> = self.workers.install(|| {
                pool.slots_mut()
                    .par_iter_mut()
                    .zip(schedule.par_iter())
                    .with_min_len(split_len)
                    .filter(|(_, scheduled)| **scheduled)
                    .filter_map(|(slot, _)| {
                        let record = slot.record_mut()?;
                        run_routine(tier, record, &ctx)
                            .err()
                            .map(|err| (record.id, err))
                    })
                    .collect()
            });

            for (agent_id, err) in &failures {
                warn!(%agent_id, %tier, tick, error = %err, "Skipping agent update");
            }
            if let Some(batch) = report.batches.get_mut(tier.index()) {
                *batch = TierBatch {
                    scheduled: quota,
                    updated: quota.saturating_sub(failures.len()),
                    skipped: failures.len(),
                    elapsed: batch_started.elapsed(),
                };
            }
        }

        report.elapsed = started.elapsed();
        self.sizer.observe(report.elapsed);
        debug!(
            tick,
            updated = report.updated(),
            skipped = report.skipped(),
            split_len,
            elapsed_us = u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX),
            "Tier batches complete"
        );
        report
    }
}

/// `voters × multiplier`, floored, never negative.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_quota(voters: usize, multiplier: f32) -> usize {
    let scaled = (voters as f64) * f64::from(multiplier.max(0.0));
    if scaled.is_finite() { scaled.floor() as usize } else { voters }
}

/// Widen a slot index for slice access.
const fn slot_index(index: u32) -> usize {
    index as usize
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use throng_types::{AgentRecord, FeatureVector, HardwareClass, TierAssignment};

    use super::*;

    fn settings(high: usize, low: usize) -> SchedulerSettings {
        SchedulerSettings {
            voters_per_frame: VotersPerFrame {
                high,
                medium: 10,
                low,
                dormant: 10,
            },
            worker_threads: 2,
            frame_budget: Duration::from_millis(8),
            min_batch: 1,
            max_batch: 64,
        }
    }

    fn populate(pool: &mut AgentPool, count: u64, tier: Tier) {
        for id in 0..count {
            let mut record = AgentRecord::new(
                AgentId::new(id),
                FeatureVector {
                    age: 40,
                    education: 3,
                    urban: false,
                    economic_axis: 0.2,
                    social_axis: -0.2,
                },
            );
            record.sentiment = 1.0;
            let handle = pool.acquire(record.id, 0).unwrap();
            pool.activate(handle, record).unwrap();
            pool.assign_tier(
                handle.index(),
                TierAssignment {
                    tier,
                    distance: 1.0,
                    frames_since_reassignment: 0,
                },
            );
        }
    }

    fn full_speed() -> AdaptiveState {
        AdaptiveState::for_hardware(HardwareClass::High)
    }

    #[test]
    fn quota_scales_with_multiplier_and_never_starves() {
        let scheduler = TieredScheduler::new(settings(500, 10)).unwrap();
        assert_eq!(scheduler.quota(Tier::High, 10_000, 0.5), 250);
        assert_eq!(scheduler.quota(Tier::High, 100, 1.0), 100);
        assert_eq!(scheduler.quota(Tier::High, 3, 0.0), 1);
        assert_eq!(scheduler.quota(Tier::High, 0, 1.0), 0);
    }

    #[test]
    fn round_robin_covers_every_agent() {
        let mut pool = AgentPool::with_capacity(10);
        populate(&mut pool, 10, Tier::Low);
        let mut scheduler = TieredScheduler::new(settings(10, 3)).unwrap();
        let routines = RoutineConfig::default();
        let adaptive = full_speed();

        for tick in 1..=4 {
            let report = scheduler.run(&mut pool, tick, &adaptive, &routines);
            assert_eq!(report.batch(Tier::Low).scheduled, 3);
        }
        for slot in pool.live_slots() {
            assert!(slot.record().unwrap().sentiment < 1.0);
        }
    }

    #[test]
    fn only_the_quota_is_updated_per_tick() {
        let mut pool = AgentPool::with_capacity(10);
        populate(&mut pool, 10, Tier::Low);
        let mut scheduler = TieredScheduler::new(settings(10, 4)).unwrap();
        scheduler.run(&mut pool, 1, &full_speed(), &RoutineConfig::default());
        let touched = pool
            .live_slots()
            .filter(|slot| slot.record().unwrap().sentiment < 1.0)
            .count();
        assert_eq!(touched, 4);
    }

    #[test]
    fn malformed_agent_is_skipped_and_batch_continues() {
        let mut pool = AgentPool::with_capacity(4);
        populate(&mut pool, 4, Tier::High);
        pool.record_mut(AgentId::new(2)).unwrap().engagement = f32::NAN;
        let mut scheduler = TieredScheduler::new(settings(4, 4)).unwrap();
        let report = scheduler.run(&mut pool, 1, &full_speed(), &RoutineConfig::default());
        let high = report.batch(Tier::High);
        assert_eq!(high.scheduled, 4);
        assert_eq!(high.skipped, 1);
        assert_eq!(high.updated, 3);
        assert!((pool.record(AgentId::new(2)).unwrap().sentiment - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn sizer_doubles_over_budget_and_halves_under_half() {
        let mut sizer = BatchSizer::new(16, 128, Duration::from_millis(8));
        sizer.observe(Duration::from_millis(10));
        assert_eq!(sizer.granularity(), 32);
        sizer.observe(Duration::from_millis(6));
        assert_eq!(sizer.granularity(), 32);
        sizer.observe(Duration::from_millis(1));
        sizer.observe(Duration::from_millis(1));
        assert_eq!(sizer.granularity(), 16);
        for _ in 0..10 {
            sizer.observe(Duration::from_millis(100));
        }
        assert_eq!(sizer.granularity(), 128);
        assert_eq!(sizer.split_len(100, 4), 25);
    }
}
