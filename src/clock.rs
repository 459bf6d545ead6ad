//! Clock Provider
//!
//! Injectable source of "current UTC time" so the hasher and the
//! election-window check stay deterministic under test.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used everywhere outside tests.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Clock pinned to a fixed instant, settable from the test body.
    pub struct FixedClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.now.lock().unwrap() = now;
        }
    }

    impl Clock for FixedClock {
        fn now_utc(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }
}
