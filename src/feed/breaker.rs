use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,
    /// Failing fast, no upstream call until the timeout elapses.
    Open,
    /// Timeout elapsed; exactly one probe call has been let through and
    /// further calls are blocked until its outcome is recorded.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding the upstream feed.
///
/// Opens after `max_failures` consecutive failures. While open, calls are
/// rejected without touching the network. Once `timeout` has elapsed since
/// the last failure a single probe call is allowed through: success closes
/// the breaker fully, failure re-opens it and restarts the timer.
pub struct CircuitBreaker {
    max_failures: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, timeout: Duration) -> Self {
        CircuitBreaker {
            max_failures,
            timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a call may proceed right now. Transitions Open -> HalfOpen
    /// when the timeout has elapsed, granting the probe to this caller.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.timeout)
                    .unwrap_or(true);
                if expired {
                    info!("Circuit breaker timeout expired, allowing probe call");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            // A probe is already in flight; nobody else gets through.
            CircuitState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, re-opening");
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
            }
            CircuitState::Closed if inner.consecutive_failures >= self.max_failures => {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    inner.consecutive_failures
                );
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn is_open(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_closed_below_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_opens_at_threshold_and_fails_fast() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(cb.try_acquire());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_exactly_one_probe_after_timeout() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        assert!(!cb.try_acquire());

        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.try_acquire());
        // Second caller is blocked while the probe is outstanding.
        assert!(!cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_probe_success_closes_fully() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_probe_failure_reopens_and_restarts_timer() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(30));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.try_acquire());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Timer restarted: still blocked right away.
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_success_resets_counter() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
