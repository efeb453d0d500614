//! Circuit breaker guarding the inference service.
//!
//! ```text
//! Closed --(threshold consecutive failures)--> Open
//! Open --(recovery timeout elapsed)--> HalfOpen (one probe allowed)
//! HalfOpen --success--> Closed
//! HalfOpen --failure--> Open
//! ```
//!
//! While the breaker is open no batch is submitted; agents simply stay
//! eligible for a later cycle. Callers pass `now` explicitly so the state
//! machine is deterministic under test.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused until the recovery timeout elapses.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

impl BreakerState {
    /// Numeric code for telemetry (`0` closed, `1` half-open, `2` open).
    pub const fn code(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_outstanding: bool,
    trips: u64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_outstanding: false,
            trips: 0,
        }
    }

    /// Current state.
    pub const fn state(&self) -> BreakerState {
        self.state
    }

    /// Number of times the breaker has opened.
    pub const fn trips(&self) -> u64 {
        self.trips
    }

    /// Whether a request may be submitted at `now`.
    ///
    /// Moves `Open` to `HalfOpen` once the recovery timeout has elapsed and
    /// hands out a single probe.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let recovered = self
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.recovery_timeout);
                if recovered {
                    self.state = BreakerState::HalfOpen;
                    self.probe_outstanding = true;
                    info!("Inference circuit breaker half-open, sending probe");
                }
                recovered
            }
            BreakerState::HalfOpen => {
                if self.probe_outstanding {
                    false
                } else {
                    self.probe_outstanding = true;
                    true
                }
            }
        }
    }

    /// Return an unused probe grant.
    ///
    /// Called when a half-open grant ends without a recorded outcome: no
    /// batch was submitted, or the probe was aborted. The breaker stays
    /// half-open and the next [`allow`](Self::allow) grants a fresh probe.
    pub fn cancel_probe(&mut self) {
        if self.state == BreakerState::HalfOpen && self.probe_outstanding {
            self.probe_outstanding = false;
            debug!("Inference circuit breaker probe returned unused");
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!("Inference circuit breaker closed");
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_outstanding = false;
    }

    /// Record a failed call at `now`.
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let reopen = self.state == BreakerState::HalfOpen;
        if reopen || self.consecutive_failures >= self.failure_threshold {
            if self.state != BreakerState::Open {
                self.trips = self.trips.saturating_add(1);
                let recovery_ms =
                    u64::try_from(self.recovery_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    failures = self.consecutive_failures,
                    recovery_ms,
                    "Inference circuit breaker opened"
                );
            }
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            self.probe_outstanding = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow(now));
        assert_eq!(breaker.trips(), 1);
    }

    #[test]
    fn success_resets_the_failure_count() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_allows_a_single_probe() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure(start);
        assert!(!breaker.allow(start + Duration::from_secs(29)));

        let later = start + Duration::from_secs(30);
        assert!(breaker.allow(later));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.allow(later));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow(later));
    }

    #[test]
    fn unused_probe_grant_can_be_returned() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure(start);
        let later = start + Duration::from_secs(5);
        assert!(breaker.allow(later));
        assert!(!breaker.allow(later));

        breaker.cancel_probe();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.allow(later));
        assert!(!breaker.allow(later));
    }

    #[test]
    fn cancel_probe_is_ignored_outside_half_open() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.cancel_probe();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure(now);
        breaker.cancel_probe();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow(now));
    }

    #[test]
    fn failed_probe_reopens() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(1));
        for _ in 0..5 {
            breaker.record_failure(start);
        }
        let later = start + Duration::from_secs(2);
        assert!(breaker.allow(later));
        breaker.record_failure(later);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow(later));
        assert_eq!(breaker.trips(), 2);
    }
}
