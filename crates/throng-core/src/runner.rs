//! Simulation loop runner.
//!
//! [`run_simulation`] drives [`Engine::tick`] until a stop is requested or
//! a bound is hit:
//!
//! - **Bounded run**: stop after `max_ticks` or `max_real_time_seconds`
//! - **Tick pacing**: sleep `tick_interval_ms` between ticks
//! - **Clean stop** on a [`RunControl`] request (Ctrl-C in the binary)
//!
//! Content comes from a [`ContentFeed`]; after every tick a
//! [`TickCallback`] sees the summary and may act on the engine (the binary
//! uses it to fulfil growth requests).

use std::sync::Arc;

use throng_inference::InferenceService;
use throng_types::ContentDescriptor;
use tracing::info;

use crate::config::ContentConfig;
use crate::control::{RunControl, SimulationEndReason};
use crate::engine::{Engine, TickError, TickSummary};

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick execution failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The reason the simulation ended.
    pub end_reason: SimulationEndReason,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
}

/// Source of the content analysed each tick.
pub trait ContentFeed: Send {
    /// Content current at `tick`.
    fn current(&mut self, tick: u64) -> &ContentDescriptor;
}

/// Rotates through a fixed topic list, switching every `interval` ticks.
#[derive(Debug, Clone)]
pub struct RotatingFeed {
    topics: Vec<ContentDescriptor>,
    interval: u64,
    fallback: ContentDescriptor,
}

impl RotatingFeed {
    /// Build a feed from the `content` config section.
    pub fn from_config(config: &ContentConfig) -> Self {
        Self::new(
            config
                .topics
                .iter()
                .map(|t| ContentDescriptor::new(t.topic.as_str(), t.text.as_str()))
                .collect(),
            config.rotation_interval_ticks,
        )
    }

    /// Build a feed from explicit descriptors.
    pub fn new(topics: Vec<ContentDescriptor>, interval: u64) -> Self {
        Self {
            topics,
            interval: interval.max(1),
            fallback: ContentDescriptor::new("general", "No content scheduled."),
        }
    }
}

impl ContentFeed for RotatingFeed {
    fn current(&mut self, tick: u64) -> &ContentDescriptor {
        let len = u64::try_from(self.topics.len()).unwrap_or(0);
        let position = tick
            .checked_div(self.interval)
            .and_then(|round| round.checked_rem(len))
            .and_then(|i| usize::try_from(i).ok());
        position
            .and_then(|i| self.topics.get(i))
            .unwrap_or(&self.fallback)
    }
}

/// Callback invoked after each tick completes.
pub trait TickCallback<S>: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, summary: &TickSummary, engine: &mut Engine<S>);
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl<S> TickCallback<S> for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _engine: &mut Engine<S>) {}
}

/// Run the simulation loop until a termination condition is met.
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick execution fails unrecoverably.
pub async fn run_simulation<S: InferenceService>(
    engine: &mut Engine<S>,
    control: &Arc<RunControl>,
    feed: &mut dyn ContentFeed,
    callback: &mut dyn TickCallback<S>,
) -> Result<SimulationResult, RunnerError> {
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;

    info!(
        run_id = %engine.run_id(),
        max_ticks = control.max_ticks(),
        max_real_time_seconds = control.max_real_time_seconds(),
        tick_interval_ms = control.tick_interval_ms(),
        "Simulation starting"
    );

    loop {
        // --- Check stop request (before tick) ---
        if control.is_stop_requested() {
            info!("Stop requested");
            return Ok(finish(
                SimulationEndReason::StopRequested,
                last_summary,
                total_ticks,
            ));
        }

        // --- Check time limit (before tick) ---
        if control.time_limit_reached() {
            info!(
                max_seconds = control.max_real_time_seconds(),
                elapsed = control.elapsed_seconds(),
                "Real-time limit reached"
            );
            return Ok(finish(
                SimulationEndReason::MaxRealTimeReached,
                last_summary,
                total_ticks,
            ));
        }

        // --- Execute tick ---
        let next_tick = engine.tick_count().saturating_add(1);
        let content = feed.current(next_tick).clone();
        let summary = engine.tick(&content)?;
        total_ticks = total_ticks.saturating_add(1);

        // --- Notify callback ---
        callback.on_tick(&summary, engine);

        // --- Check tick limit (after tick) ---
        if control.tick_limit_reached(summary.tick) {
            info!(
                tick = summary.tick,
                max_ticks = control.max_ticks(),
                "Tick limit reached"
            );
            return Ok(finish(
                SimulationEndReason::MaxTicksReached,
                Some(summary),
                total_ticks,
            ));
        }

        last_summary = Some(summary);

        // --- Sleep for tick interval ---
        let interval_ms = control.tick_interval_ms();
        if interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(interval_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

const fn finish(
    reason: SimulationEndReason,
    final_summary: Option<TickSummary>,
    total_ticks: u64,
) -> SimulationResult {
    SimulationResult {
        end_reason: reason,
        final_summary,
        total_ticks,
    }
}

/// Log the simulation end.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_summary.as_ref().map(|s| s.tick),
        final_live_agents = result.final_summary.as_ref().map(|s| s.live_agents),
        "Simulation ended"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotating_feed_switches_every_interval() {
        let mut feed = RotatingFeed::new(
            vec![
                ContentDescriptor::new("a", "first"),
                ContentDescriptor::new("b", "second"),
            ],
            10,
        );
        assert_eq!(feed.current(0).topic, "a");
        assert_eq!(feed.current(9).topic, "a");
        assert_eq!(feed.current(10).topic, "b");
        assert_eq!(feed.current(20).topic, "a");
    }

    #[test]
    fn empty_feed_serves_fallback() {
        let mut feed = RotatingFeed::new(Vec::new(), 5);
        assert_eq!(feed.current(3).topic, "general");
    }

    #[test]
    fn default_topics_feed_rotates() {
        let mut feed = RotatingFeed::from_config(&ContentConfig::default());
        let first = feed.current(1).topic.clone();
        let second = feed.current(900).topic.clone();
        assert_ne!(first, second);
    }
}
