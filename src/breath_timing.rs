//! Phase timing compensation.
//!
//! The active part of each phase (emptying to PEEP and refilling the bottle,
//! or filling to the pressure/volume limit) takes a variable time.  After it
//! the controller holds for `nominal - actual` so that one inspiration plus one
//! expiration still add up to `60000 / RR` ms.
//!
//! Respiratory rate wins over I:E: when one phase overruns its nominal share
//! the deficit is taken out of the other phase's hold, once, and never makes
//! a hold negative.

use crate::data_structs::Setpoints;
use crate::time_util::Duration;

/// Nominal phase durations for the current setpoints, in ms.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NominalDurations {
    pub inspiration_ms: f32,
    pub expiration_ms: f32,
}

pub fn nominal_durations(setpoints: &Setpoints) -> NominalDurations {
    let one_cycle_ms = 60_000.0 / setpoints.respiratory_rate;
    let ie = setpoints.ie_ratio;
    NominalDurations {
        expiration_ms: one_cycle_ms / (1.0 + ie),
        inspiration_ms: one_cycle_ms / (1.0 + 1.0 / ie),
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TimingCompensator {
    max_peep_delay: Duration,
    max_plateau_delay: Duration,
    // Signed corrections as computed for the last phase of each kind.
    // Negative means that phase overran and the deficit is still owed.
    correction_pe_ms: i64,
    correction_pi_ms: i64,
    delay_pe: Duration,
    delay_pi: Duration,
}

impl TimingCompensator {
    pub fn new(max_peep_delay: Duration, max_plateau_delay: Duration) -> TimingCompensator {
        TimingCompensator {
            max_peep_delay,
            max_plateau_delay,
            correction_pe_ms: 0,
            correction_pi_ms: 0,
            delay_pe: Duration::from_ticks(0),
            delay_pi: Duration::from_ticks(0),
        }
    }

    /// Hold after the active expiration (the PEEP delay).
    pub fn expiration_delay(&mut self, setpoints: &Setpoints, actual_te: Duration) -> Duration {
        let nominal = nominal_durations(setpoints);
        let (correction, delay) = compensate(
            nominal.expiration_ms,
            actual_te,
            self.correction_pi_ms,
            self.max_peep_delay,
        );
        self.correction_pe_ms = correction;
        self.delay_pe = delay;
        delay
    }

    /// Hold after the active inspiration (the plateau delay).
    pub fn inspiration_delay(&mut self, setpoints: &Setpoints, actual_ti: Duration) -> Duration {
        let nominal = nominal_durations(setpoints);
        let (correction, delay) = compensate(
            nominal.inspiration_ms,
            actual_ti,
            self.correction_pe_ms,
            self.max_plateau_delay,
        );
        self.correction_pi_ms = correction;
        self.delay_pi = delay;
        delay
    }

    /// Last applied (delay_pe, delay_pi).
    pub fn delays(&self) -> (Duration, Duration) {
        (self.delay_pe, self.delay_pi)
    }
}

// Returns the signed correction to remember and the hold to apply
fn compensate(nominal_ms: f32, actual: Duration, other_ms: i64, max: Duration) -> (i64, Duration) {
    let mut correction = nominal_ms as i64 - actual.to_millis() as i64;
    if other_ms < 0 && correction >= 0 {
        // Pay back the other phase's overrun, but never below zero
        correction = (correction + other_ms).max(0);
    }
    let delay = correction.clamp(0, max.to_millis() as i64) as u32;
    (correction, Duration::millis(delay))
}
