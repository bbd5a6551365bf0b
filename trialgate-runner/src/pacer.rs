//! Runtime dispatch gate.
//!
//! Every worker passes through one gate before dispatching a sample. The gate
//! hands out time slots spaced by the plan's dispatch interval, so aggregate
//! throughput across all workers stays at or under the effective rate. A
//! worker sleeps outside the lock until its slot arrives.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use trialgate_core::pacing::PacingPlan;

#[derive(Debug)]
pub struct DispatchGate {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl DispatchGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn from_plan(plan: &PacingPlan) -> Self {
        Self::new(plan.dispatch_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next slot and return when it should be used.
    ///
    /// The first reservation is immediate; each later one is at least
    /// `interval` after the previous.
    pub fn reserve(&self) -> Instant {
        let now = Instant::now();
        if self.interval.is_zero() {
            return now;
        }
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match *next {
            Some(reserved) if reserved > now => reserved,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot
    }

    /// Block until this caller's slot arrives. Returns time spent waiting.
    pub fn wait(&self) -> Duration {
        let slot = self.reserve();
        let now = Instant::now();
        if slot > now {
            let pause = slot - now;
            thread::sleep(pause);
            pause
        } else {
            Duration::ZERO
        }
    }
}
