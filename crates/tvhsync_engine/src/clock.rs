//! Wall-clock access.

use chrono::{Datelike, Local, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in unix seconds.
    fn now(&self) -> i64;

    /// Daylight saving offset currently in effect locally, in milliseconds.
    fn dst_offset_ms(&self) -> i64;
}

/// The system clock and local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn dst_offset_ms(&self) -> i64 {
        let now = Local::now();
        let offset_at = |month: u32| {
            Local
                .with_ymd_and_hms(now.year(), month, 1, 12, 0, 0)
                .single()
                .map(|t| t.offset().local_minus_utc())
        };
        match (offset_at(1), offset_at(7)) {
            (Some(january), Some(july)) => {
                let standard = january.min(july);
                i64::from(now.offset().local_minus_utc() - standard) * 1000
            }
            _ => 0,
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    dst_offset_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a clock stopped at `now`.
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
            dst_offset_ms: AtomicI64::new(0),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Sets the reported daylight saving offset.
    pub fn set_dst_offset_ms(&self, offset: i64) {
        self.dst_offset_ms.store(offset, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn dst_offset_ms(&self) -> i64 {
        self.dst_offset_ms.load(Ordering::SeqCst)
    }
}
