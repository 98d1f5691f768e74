use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// "Has enough time passed since the last action" gate.
///
/// `last_fired_at_millis == 0` means the gate has never fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleGate {
    interval_millis: i64,
    last_fired_at_millis: i64,
}

impl ThrottleGate {
    pub fn new(interval_millis: i64) -> Self {
        Self {
            interval_millis: interval_millis.max(0),
            last_fired_at_millis: 0,
        }
    }

    /// Returns true and records `now` if forced or the interval has elapsed.
    pub fn try_fire(&mut self, now_millis: i64, force: bool) -> bool {
        if !force && now_millis - self.last_fired_at_millis < self.interval_millis {
            return false;
        }
        self.last_fired_at_millis = now_millis;
        true
    }

    pub fn interval_millis(&self) -> i64 {
        self.interval_millis
    }

    /// Change the interval without touching the last-fired clock
    pub fn set_interval_millis(&mut self, interval_millis: i64) {
        self.interval_millis = interval_millis.max(0);
    }

    pub fn last_fired_at_millis(&self) -> i64 {
        self.last_fired_at_millis
    }
}

/// Wall-clock source in unix milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_millis: i64) {
        self.now.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
