//! Liveness detection for the incoming block stream.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::pb::substreams::v1::Clock;

/// Decides whether the stream has caught up with the chain head.
///
/// Once a checker has returned `true` for any clock it must keep returning
/// `true` unconditionally; the signal is sticky for the life of the sinker.
pub trait LivenessChecker: Send {
    fn is_live(&mut self, clock: &Clock) -> bool;
}

/// Default [`LivenessChecker`]: a block is live when its timestamp is within
/// `delta` of the current time.
pub struct DeltaLivenessChecker {
    delta: Duration,
    now_fn: Box<dyn Fn() -> SystemTime + Send + Sync>,
    is_live: bool,
}

impl DeltaLivenessChecker {
    #[must_use]
    pub fn new(delta: Duration) -> Self {
        Self {
            delta,
            now_fn: Box::new(SystemTime::now),
            is_live: false,
        }
    }

    #[cfg(test)]
    fn with_now(delta: Duration, now_fn: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        Self {
            delta,
            now_fn: Box::new(now_fn),
            is_live: false,
        }
    }
}

impl LivenessChecker for DeltaLivenessChecker {
    fn is_live(&mut self, clock: &Clock) -> bool {
        if self.is_live {
            return true;
        }

        let Some(timestamp) = &clock.timestamp else {
            return false;
        };

        let Ok(seconds) = u64::try_from(timestamp.seconds) else {
            return false;
        };
        let Ok(nanos) = u32::try_from(timestamp.nanos) else {
            return false;
        };
        let block_time = UNIX_EPOCH + Duration::new(seconds, nanos);

        let now = (self.now_fn)();
        if let Ok(age) = now.duration_since(block_time) {
            if age <= self.delta {
                self.is_live = true;
            }
        } else {
            // Block timestamp is ahead of our clock, the stream is at the head.
            self.is_live = true;
        }

        self.is_live
    }
}
