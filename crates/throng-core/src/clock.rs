//! Tick clock for the Throng engine.
//!
//! The clock is the single source of truth for simulated time. Every
//! periodic phase of the tick (classification, selection, sweeps,
//! compaction) is derived from the tick counter through
//! [`SimClock::is_due`], and simulated days are derived from the counter
//! and the configured `ticks_per_day`, never stored independently.
//!
//! All arithmetic is checked; the counter never wraps silently.

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Invalid time configuration (e.g. zero ticks per day).
    #[error("invalid time configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Simulation clock counting ticks since engine start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimClock {
    /// Current tick number (0 before the first tick runs).
    tick: u64,

    /// Number of ticks in one simulated day.
    ticks_per_day: u64,
}

impl SimClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `ticks_per_day` is 0.
    pub fn new(ticks_per_day: u64) -> Result<Self, ClockError> {
        Self::from_parts(0, ticks_per_day)
    }

    /// Create a clock at an explicit tick (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `ticks_per_day` is 0.
    pub fn from_parts(tick: u64, ticks_per_day: u64) -> Result<Self, ClockError> {
        if ticks_per_day == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "ticks_per_day must be at least 1".to_owned(),
            });
        }
        Ok(Self {
            tick,
            ticks_per_day,
        })
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }

    /// Return the current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Return the configured number of ticks per simulated day.
    pub const fn ticks_per_day(&self) -> u64 {
        self.ticks_per_day
    }

    /// Simulated day the current tick falls in (day 0 is the first).
    pub fn day(&self) -> u64 {
        self.tick.checked_div(self.ticks_per_day).unwrap_or(0)
    }

    /// Position of the current tick within its day.
    pub fn tick_of_day(&self) -> u64 {
        self.tick.checked_rem(self.ticks_per_day).unwrap_or(0)
    }

    /// Whether a phase running every `interval` ticks is due this tick.
    ///
    /// An interval of 0 disables the phase.
    pub fn is_due(&self, interval: u64) -> bool {
        self.tick
            .checked_rem(interval)
            .is_some_and(|remainder| remainder == 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_ticks_per_day_is_rejected() {
        let err = SimClock::new(0).unwrap_err();
        assert!(matches!(err, ClockError::InvalidConfig { .. }));
    }

    #[test]
    fn advance_increments_and_derives_days() {
        let mut clock = SimClock::new(10).unwrap();
        for _ in 0..25 {
            clock.advance().unwrap();
        }
        assert_eq!(clock.tick(), 25);
        assert_eq!(clock.day(), 2);
        assert_eq!(clock.tick_of_day(), 5);
    }

    #[test]
    fn advance_at_max_overflows() {
        let mut clock = SimClock::from_parts(u64::MAX, 10).unwrap();
        assert_eq!(clock.advance().unwrap_err(), ClockError::TickOverflow);
        assert_eq!(clock.tick(), u64::MAX);
    }

    #[test]
    fn phase_due_on_interval_multiples() {
        let clock = SimClock::from_parts(30, 240).unwrap();
        assert!(clock.is_due(10));
        assert!(clock.is_due(30));
        assert!(!clock.is_due(7));
        assert!(!clock.is_due(0));
    }
}
