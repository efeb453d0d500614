//! Tick orchestration for the Throng population engine.
//!
//! This crate composes the agent pool and the inference pipeline into a
//! single [`Engine`] with an explicit `init` / `tick` / `shutdown`
//! lifecycle, and wraps it in an async run loop.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `throng-config.yaml` into
//!   strongly-typed structs.
//! - [`clock`] -- Tick counter and derived simulated days.
//! - [`adaptive`] -- [`AdaptiveState`] knobs and the controller that
//!   adjusts them from frame-time and memory history.
//! - [`classifier`] -- Distance-based tier assignment with capacity caps.
//! - [`scheduler`] -- Per-tier sub-batches run on a rayon worker pool.
//! - [`telemetry`] -- Metric sinks.
//! - [`control`] -- Stop request and run bounds shared with the host.
//! - [`engine`] -- The composed tick.
//! - [`runner`] -- The async loop around [`Engine::tick`].

pub mod adaptive;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod control;
pub mod engine;
pub mod runner;
pub mod scheduler;
pub mod telemetry;

pub use adaptive::{
    AdaptiveController, AdaptiveState, ControlDecision, PopulationAdjustment, PopulationBounds,
};
pub use classifier::{ClassificationReport, ClassifierSettings, TierClassifier, effective_distance};
pub use clock::{ClockError, SimClock};
pub use config::{ConfigError, SimulationConfig};
pub use control::{RunControl, SimulationEndReason};
pub use engine::{Collaborators, Engine, EngineError, ShutdownReport, TickError, TickSummary};
pub use runner::{
    ContentFeed, NoOpCallback, RotatingFeed, RunnerError, SimulationResult, TickCallback,
    log_simulation_end, run_simulation,
};
pub use scheduler::{BatchSizer, ScheduleReport, SchedulerError, SchedulerSettings, TieredScheduler};
pub use telemetry::{MemoryTelemetry, TelemetrySink, TracingTelemetry};
