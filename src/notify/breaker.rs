//! Circuit Breaker
//!
//! Explicit Closed/Open/HalfOpen state machine guarding the notification
//! transport. Opens after a run of consecutive qualifying failures, rejects
//! sends for a cooldown, then lets one probe through.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a send may proceed right now. An open breaker whose cooldown
    /// has elapsed transitions to half-open and admits one probe.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            // A failed half-open probe reopens immediately.
            CircuitState::HalfOpen => trip(&mut inner),
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    trip(&mut inner);
                }
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

fn trip(inner: &mut Inner) {
    inner.state = CircuitState::Open;
    inner.opened_at = Some(Instant::now());
}
