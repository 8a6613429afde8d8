use fugit::{MillisDurationU32, TimerInstantU32};

/// Millisecond timestamp.  Wraps after ~49 days; comparisons are wraparound aware.
pub type Instant = TimerInstantU32<1000>;
pub type Duration = MillisDurationU32;

/// Source of "now" for the periodic tasks.  The firmware reads the RTIC
/// monotonic, tests use a hand-stepped clock.
pub trait Clock {
    fn now(&self) -> Instant;
}

pub fn instant_from_millis(ms: u32) -> Instant {
    Instant::from_ticks(ms)
}

// The RP2040 monotonic counts microseconds in 64 bits
pub fn instant_from_micros(us: u64) -> Instant {
    Instant::from_ticks((us / 1000) as u32)
}

/// Time since `since`, or zero if `since` is in the future.
pub fn elapsed(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}

// 16 bit wraparound timestamp used on the telemetry lines
pub fn timestamp_u16(now: Instant) -> u16 {
    now.ticks() as u16
}

/// Fixed cadence timer.  The next deadline is advanced from the previous
/// deadline, not from `now`, so a late poll shortens the next interval and
/// the cadence does not drift.
#[derive(Debug, Copy, Clone)]
pub struct PeriodTimer {
    period: Duration,
    next_due: Instant,
}

impl PeriodTimer {
    pub fn new(period: Duration, start: Instant) -> PeriodTimer {
        PeriodTimer {
            period,
            next_due: start + period,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Returns true (and arms the next deadline) if the period has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.next_due = self.next_due + self.period;
        true
    }
}
