//! Telemetry sinks.
//!
//! The engine reports named scalar metrics once per tick through a
//! [`TelemetrySink`]. [`TracingTelemetry`] forwards them to `tracing`;
//! [`MemoryTelemetry`] keeps them for assertions in tests.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

/// Metric names emitted by the engine.
pub mod metrics {
    /// Live agents in the High tier.
    pub const TIER_HIGH: &str = "tier.high";
    /// Live agents in the Medium tier.
    pub const TIER_MEDIUM: &str = "tier.medium";
    /// Live agents in the Low tier.
    pub const TIER_LOW: &str = "tier.low";
    /// Live agents in the Dormant tier.
    pub const TIER_DORMANT: &str = "tier.dormant";
    /// Live population.
    pub const LIVE_AGENTS: &str = "pool.live";
    /// Wall time of the tick in milliseconds.
    pub const FRAME_MS: &str = "frame.ms";
    /// Wall time of all tier batches in milliseconds.
    pub const BATCH_MS: &str = "scheduler.batch_ms";
    /// Agents updated by the scheduler.
    pub const UPDATED: &str = "scheduler.updated";
    /// Estimated resident memory in megabytes.
    pub const MEMORY_MB: &str = "memory.mb";
    /// Cache hit ratio since start.
    pub const CACHE_HIT_RATIO: &str = "cache.hit_ratio";
    /// Cache entries held.
    pub const CACHE_ENTRIES: &str = "cache.entries";
    /// Outstanding inference requests.
    pub const INFLIGHT: &str = "inference.inflight";
    /// Breaker state code (0 closed, 1 open, 2 half-open).
    pub const BREAKER_STATE: &str = "inference.breaker";
    /// Update-frequency multiplier.
    pub const UPDATE_MULTIPLIER: &str = "adaptive.update_multiplier";
    /// Inference-rate multiplier.
    pub const INFERENCE_MULTIPLIER: &str = "adaptive.inference_multiplier";
}

/// Destination for engine metrics.
pub trait TelemetrySink: Send + Sync {
    /// Record one sample of a named metric.
    fn record(&self, name: &'static str, value: f64);
}

/// Forwards metrics to `tracing` at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, name: &'static str, value: f64) {
        trace!(metric = name, value, "telemetry");
    }
}

/// Keeps every sample in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    samples: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl MemoryTelemetry {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples of a metric, oldest first.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.samples.lock().get(name).cloned().unwrap_or_default()
    }

    /// Latest sample of a metric.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.samples.lock().get(name).and_then(|v| v.last().copied())
    }

    /// Number of distinct metrics recorded.
    pub fn metric_count(&self) -> usize {
        self.samples.lock().len()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, name: &'static str, value: f64) {
        self.samples.lock().entry(name).or_default().push(value);
    }
}
