//! O2/air blending into the reservoir bottle.
//!
//! Runs once per control tick while the breath cycle is in expiration.  The
//! bottle is first filled with pure O2 up to a partial pressure proportional
//! to the requested O2 fraction, then topped up with air to the bottle target.
//! Pressure in the bottle at the start of the refill is treated as air.

use crate::config::{O2_AMBIENT_PERCENT, O2_PURE_PERCENT, O2_SPAN_PERCENT};
use crate::data_structs::ValveOutputs;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OxygenMixState {
    MeasureBaseline,
    FillO2,
    DecideAir,
    FillAir,
    Done,
}

pub struct OxygenMixingAutomat {
    state: OxygenMixState,
    bottle_target: f32,
    baseline: f32,
    o2_partial_target: f32,
}

impl OxygenMixingAutomat {
    pub fn new(bottle_target: f32) -> OxygenMixingAutomat {
        OxygenMixingAutomat {
            state: OxygenMixState::MeasureBaseline,
            bottle_target,
            baseline: 0.0,
            o2_partial_target: 0.0,
        }
    }

    /// Called at the start of every expiration.
    pub fn reset(&mut self) {
        self.state = OxygenMixState::MeasureBaseline;
        self.baseline = 0.0;
        self.o2_partial_target = 0.0;
    }

    pub fn state(&self) -> OxygenMixState {
        self.state
    }

    pub fn fill_reached(&self) -> bool {
        self.state == OxygenMixState::Done
    }

    /// O2 line pressure at which the O2 fill stops for this refill.
    pub fn o2_partial_target(&self) -> f32 {
        self.o2_partial_target
    }

    /// Advances at most one state.  `o2_line` is the reservoir pressure in kPa.
    pub fn step(&mut self, o2_line: f32, set_o2: f32, outputs: &mut ValveOutputs) -> OxygenMixState {
        match self.state {
            OxygenMixState::MeasureBaseline => {
                self.baseline = o2_line;
                let bottle_range = self.bottle_target - self.baseline;
                self.o2_partial_target =
                    self.baseline + bottle_range / O2_SPAN_PERCENT * (set_o2 - O2_AMBIENT_PERCENT);
                if set_o2 > O2_AMBIENT_PERCENT {
                    outputs.set_o2_fill(true);
                    self.state = OxygenMixState::FillO2;
                } else {
                    self.state = OxygenMixState::DecideAir;
                }
                trace!(
                    "o2 mix: baseline {} kPa, o2 target {} kPa",
                    self.baseline,
                    self.o2_partial_target
                );
            }
            OxygenMixState::FillO2 => {
                if o2_line >= self.o2_partial_target {
                    outputs.set_o2_fill(false);
                    self.state = OxygenMixState::DecideAir;
                }
            }
            OxygenMixState::DecideAir => {
                if set_o2 < O2_PURE_PERCENT {
                    outputs.set_air_fill(true);
                    self.state = OxygenMixState::FillAir;
                } else {
                    self.state = OxygenMixState::Done;
                }
            }
            OxygenMixState::FillAir => {
                if o2_line >= self.bottle_target {
                    outputs.set_air_fill(false);
                    self.state = OxygenMixState::Done;
                }
            }
            OxygenMixState::Done => {}
        }
        self.state
    }
}
