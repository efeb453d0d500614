//! Adaptive performance control.
//!
//! [`AdaptiveState`] holds the process-wide knobs every other phase reads:
//! the update-frequency and inference-rate multipliers, the tier
//! complexity level, and whether advanced behaviours run. It is a struct
//! of atomics shared by [`Arc`]; only the [`AdaptiveController`] writes it.
//!
//! The controller keeps circular histories of frame times and memory
//! samples. Once per check interval it classifies the latest window into a
//! [`PerformanceState`] and applies that state's action. There is no
//! integral term: each action depends only on the latest classification.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use throng_types::{HardwareClass, PerformanceState};
use tracing::{debug, info};

use crate::config::AdaptiveConfig;

/// Highest tier complexity level.
pub const MAX_COMPLEXITY_LEVEL: u8 = 3;

/// Shared adaptive knobs.
#[derive(Debug)]
pub struct AdaptiveState {
    /// `f32` bits of the update-frequency multiplier.
    update_frequency: AtomicU32,
    /// `f32` bits of the inference-rate multiplier.
    inference_rate: AtomicU32,
    complexity_level: AtomicU8,
    advanced_behaviors: AtomicBool,
    hardware: HardwareClass,
}

impl AdaptiveState {
    /// Initial state for a hardware class.
    pub fn for_hardware(hardware: HardwareClass) -> Self {
        let (multiplier, level, advanced) = hardware_defaults(hardware);
        Self::with_values(hardware, multiplier, multiplier, level, advanced)
    }

    /// State with explicit values (useful for testing).
    pub fn with_values(
        hardware: HardwareClass,
        update_frequency: f32,
        inference_rate: f32,
        complexity_level: u8,
        advanced_behaviors: bool,
    ) -> Self {
        Self {
            update_frequency: AtomicU32::new(update_frequency.to_bits()),
            inference_rate: AtomicU32::new(inference_rate.to_bits()),
            complexity_level: AtomicU8::new(complexity_level.min(MAX_COMPLEXITY_LEVEL)),
            advanced_behaviors: AtomicBool::new(advanced_behaviors),
            hardware,
        }
    }

    /// Scales per-tier update quotas.
    pub fn update_frequency_multiplier(&self) -> f32 {
        f32::from_bits(self.update_frequency.load(Ordering::Acquire))
    }

    /// Scales the representative cap and the selection cadence.
    pub fn inference_rate_multiplier(&self) -> f32 {
        f32::from_bits(self.inference_rate.load(Ordering::Acquire))
    }

    /// Tier complexity level, `0..=3`; scales the High and Medium caps.
    pub fn tier_complexity_level(&self) -> u8 {
        self.complexity_level.load(Ordering::Acquire)
    }

    /// Whether High-tier social influence runs.
    pub fn advanced_behaviors_enabled(&self) -> bool {
        self.advanced_behaviors.load(Ordering::Acquire)
    }

    /// Hardware class the state was seeded from.
    pub const fn hardware(&self) -> HardwareClass {
        self.hardware
    }

    pub(crate) fn set_update_frequency_multiplier(&self, value: f32) {
        self.update_frequency.store(value.to_bits(), Ordering::Release);
    }

    pub(crate) fn set_inference_rate_multiplier(&self, value: f32) {
        self.inference_rate.store(value.to_bits(), Ordering::Release);
    }

    pub(crate) fn set_tier_complexity_level(&self, level: u8) {
        self.complexity_level
            .store(level.min(MAX_COMPLEXITY_LEVEL), Ordering::Release);
    }

    pub(crate) fn set_advanced_behaviors(&self, enabled: bool) {
        self.advanced_behaviors.store(enabled, Ordering::Release);
    }
}

/// Starting multiplier, complexity level and advanced flag per hardware class.
const fn hardware_defaults(hardware: HardwareClass) -> (f32, u8, bool) {
    match hardware {
        HardwareClass::Low => (0.5, 1, false),
        HardwareClass::Mid => (0.8, 2, true),
        HardwareClass::High => (1.0, MAX_COMPLEXITY_LEVEL, true),
    }
}

/// Fixed-length circular sample history.
#[derive(Debug, Clone)]
struct SampleRing {
    samples: Vec<f64>,
    capacity: usize,
    next: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else if let Some(slot) = self.samples.get_mut(self.next) {
            *slot = value;
        }
        self.next = self.next.saturating_add(1).checked_rem(self.capacity).unwrap_or(0);
    }

    #[allow(clippy::cast_precision_loss)]
    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn percentile_95(&self) -> f64 {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = sorted.len().saturating_mul(95).div_ceil(100).saturating_sub(1);
        sorted.get(rank).copied().unwrap_or(0.0)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Population change requested by a control decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationAdjustment {
    /// Leave the population alone.
    None,
    /// Release this many Low/Dormant agents.
    Shrink(usize),
    /// Spawn up to this many agents.
    Grow(usize),
}

/// Outcome of one controller check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    /// Classified performance state.
    pub state: PerformanceState,
    /// Rolling average frame time in milliseconds.
    pub frame_avg_ms: f64,
    /// Rolling 95th-percentile frame time in milliseconds.
    pub frame_p95_ms: f64,
    /// Rolling average memory in megabytes.
    pub memory_avg_mb: f64,
    /// Update-frequency multiplier after the action.
    pub update_frequency_multiplier: f32,
    /// Inference-rate multiplier after the action.
    pub inference_rate_multiplier: f32,
    /// Population change to carry out.
    pub adjustment: PopulationAdjustment,
}

/// Population figures the controller weighs its adjustment against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationBounds {
    /// Current live population.
    pub live: usize,
    /// Target the controller shrinks toward.
    pub target: usize,
    /// Largest population the tiers and pool can hold.
    pub ceiling: usize,
    /// Agents added or shed per step.
    pub step: usize,
}

/// Single writer of [`AdaptiveState`].
#[derive(Debug)]
pub struct AdaptiveController {
    config: AdaptiveConfig,
    state: Arc<AdaptiveState>,
    frames: SampleRing,
    memory: SampleRing,
    check_interval: Duration,
    last_check: Option<Instant>,
}

impl AdaptiveController {
    /// Create a controller writing to `state`.
    pub fn new(config: &AdaptiveConfig, state: Arc<AdaptiveState>) -> Self {
        Self {
            frames: SampleRing::new(config.frame_history),
            memory: SampleRing::new(config.memory_history),
            check_interval: Duration::from_millis(config.check_interval_ms),
            last_check: None,
            config: config.clone(),
            state,
        }
    }

    /// The shared state this controller writes.
    pub const fn state(&self) -> &Arc<AdaptiveState> {
        &self.state
    }

    /// Record one tick's frame time.
    pub fn record_frame(&mut self, frame_ms: f64) {
        if frame_ms.is_finite() && frame_ms >= 0.0 {
            self.frames.push(frame_ms);
        }
    }

    /// Record one memory sample.
    pub fn record_memory(&mut self, memory_mb: f64) {
        if memory_mb.is_finite() && memory_mb >= 0.0 {
            self.memory.push(memory_mb);
        }
    }

    /// Number of frame samples held.
    pub fn frame_samples(&self) -> usize {
        self.frames.len()
    }

    /// Whether a check interval has elapsed since the last check.
    pub fn due(&self, now: Instant) -> bool {
        self.last_check
            .is_none_or(|last| now.saturating_duration_since(last) >= self.check_interval)
    }

    /// Classify rolling statistics into a performance state.
    pub fn classify(&self, frame_avg: f64, frame_p95: f64, memory_mb: f64) -> PerformanceState {
        let c = &self.config;
        if frame_avg > c.critical_frame_ms || memory_mb > c.memory_critical_mb {
            PerformanceState::Critical
        } else if frame_avg > c.target_frame_ms
            || frame_p95 > c.critical_frame_ms
            || memory_mb > c.memory_warning_mb
        {
            PerformanceState::Warning
        } else if frame_avg < c.excellent_ratio * c.target_frame_ms
            && frame_p95 < c.target_frame_ms
            && memory_mb < c.memory_warning_mb / 2.0
        {
            PerformanceState::Excellent
        } else {
            PerformanceState::Good
        }
    }

    /// Run one check: classify the current window and apply its action.
    pub fn check(&mut self, now: Instant, population: PopulationBounds) -> ControlDecision {
        self.last_check = Some(now);
        let frame_avg_ms = self.frames.average();
        let frame_p95_ms = self.frames.percentile_95();
        let memory_avg_mb = self.memory.average();
        let state = self.classify(frame_avg_ms, frame_p95_ms, memory_avg_mb);

        let adjustment = match state {
            PerformanceState::Critical => self.on_critical(population),
            PerformanceState::Warning => self.on_warning(population),
            PerformanceState::Good => {
                self.on_good();
                PopulationAdjustment::None
            }
            PerformanceState::Excellent => self.on_excellent(population),
        };

        let decision = ControlDecision {
            state,
            frame_avg_ms,
            frame_p95_ms,
            memory_avg_mb,
            update_frequency_multiplier: self.state.update_frequency_multiplier(),
            inference_rate_multiplier: self.state.inference_rate_multiplier(),
            adjustment,
        };

        if matches!(state, PerformanceState::Critical | PerformanceState::Warning) {
            info!(
                %state,
                frame_avg_ms,
                frame_p95_ms,
                memory_avg_mb,
                update_multiplier = decision.update_frequency_multiplier,
                inference_multiplier = decision.inference_rate_multiplier,
                complexity = self.state.tier_complexity_level(),
                ?adjustment,
                "Adaptive controller shedding load"
            );
        } else {
            debug!(
                %state,
                frame_avg_ms,
                frame_p95_ms,
                memory_avg_mb,
                update_multiplier = decision.update_frequency_multiplier,
                ?adjustment,
                "Adaptive check"
            );
        }
        decision
    }

    fn scale_multipliers(&self, factor: f32) {
        let floor = self.config.multiplier_floor;
        let ceiling = self.config.multiplier_ceiling;
        let scale = |value: f32| (value * factor).clamp(floor, ceiling);
        self.state
            .set_update_frequency_multiplier(scale(self.state.update_frequency_multiplier()));
        self.state
            .set_inference_rate_multiplier(scale(self.state.inference_rate_multiplier()));
    }

    fn on_critical(&self, population: PopulationBounds) -> PopulationAdjustment {
        self.scale_multipliers(self.config.critical_factor);
        self.state.set_advanced_behaviors(false);
        self.state
            .set_tier_complexity_level(self.state.tier_complexity_level().saturating_sub(1));
        // Only the excess over target is released; at or below target the
        // multipliers carry the whole response.
        let excess = population.live.saturating_sub(population.target);
        if excess == 0 {
            PopulationAdjustment::None
        } else {
            PopulationAdjustment::Shrink(excess)
        }
    }

    fn on_warning(&self, population: PopulationBounds) -> PopulationAdjustment {
        self.scale_multipliers(self.config.warning_factor);
        let excess = population.live.saturating_sub(population.target);
        if excess == 0 {
            PopulationAdjustment::None
        } else {
            PopulationAdjustment::Shrink(excess.min(population.step.max(1)))
        }
    }

    fn on_good(&self) {
        let smoothing = self.config.smoothing;
        let relax = |value: f32| value + smoothing * (1.0 - value);
        self.state
            .set_update_frequency_multiplier(relax(self.state.update_frequency_multiplier()));
        self.state
            .set_inference_rate_multiplier(relax(self.state.inference_rate_multiplier()));
        self.restore_hardware_defaults();
    }

    fn on_excellent(&self, population: PopulationBounds) -> PopulationAdjustment {
        self.scale_multipliers(self.config.growth_factor);
        self.restore_hardware_defaults();
        let headroom = population.ceiling.saturating_sub(population.live);
        let grow = headroom.min(population.step);
        if grow == 0 {
            PopulationAdjustment::None
        } else {
            PopulationAdjustment::Grow(grow)
        }
    }

    /// Step the complexity level and advanced flag back toward what the
    /// hardware class allows.
    fn restore_hardware_defaults(&self) {
        let (_, default_level, default_advanced) = hardware_defaults(self.state.hardware());
        let level = self.state.tier_complexity_level();
        if level < default_level {
            self.state.set_tier_complexity_level(level.saturating_add(1));
        }
        if default_advanced {
            self.state.set_advanced_behaviors(true);
        }
    }
}
