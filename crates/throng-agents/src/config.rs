//! Rates consumed by the per-tier update routines.

use serde::{Deserialize, Serialize};

/// Tunables for the per-tier update routines.
///
/// Built by the core configuration layer from the `scheduler`,
/// `propagation` and `world` sections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutineConfig {
    /// Fraction of the gap to the agent's stance closed per update.
    pub opinion_rate: f32,
    /// Fraction of the gap to the cluster mean closed per full update.
    pub social_rate: f32,
    /// Fraction of sentiment lost per low-tier update.
    pub neutral_decay_rate: f32,
    /// Ticks after an influence before the emotional boost starts relaxing.
    pub boost_decay_window: u64,
    /// Fraction of the emotional boost lost per tick once relaxing.
    pub boost_decay_rate: f32,
    /// Ticks in one simulated day (dormant aging step).
    pub ticks_per_day: u64,
}

impl Default for RoutineConfig {
    fn default() -> Self {
        Self {
            opinion_rate: 0.05,
            social_rate: 0.1,
            neutral_decay_rate: 0.02,
            boost_decay_window: 30,
            boost_decay_rate: 0.1,
            ticks_per_day: 240,
        }
    }
}
