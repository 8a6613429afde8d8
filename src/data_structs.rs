use crate::config::{SETPOINTS_MAX, SETPOINTS_MIN};

/// Breath phase as seen by the statistics engine.  Set by the valve
/// controller, never inferred from flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BreathPhase {
    Inspiration,
    Expiration,
}

/// Operator setpoints, read from the six front panel potentiometers.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Setpoints {
    pub o2_percent: f32,        // %, 21..100
    pub max_pressure: f32,      // cmH2O
    pub peep: f32,              // cmH2O
    pub respiratory_rate: f32,  // breaths/min
    pub tidal_volume: f32,      // mL
    pub ie_ratio: f32,          // Ti/Te, 1.0 = 1:1, 0.33 = 1:3
}

impl Setpoints {
    /// Forces every value into its panel range.  A NaN (failed read) falls
    /// back to the low end of the range.
    pub fn clamped(self) -> Setpoints {
        Setpoints {
            o2_percent: clamp_or_min(self.o2_percent, SETPOINTS_MIN.o2_percent, SETPOINTS_MAX.o2_percent),
            max_pressure: clamp_or_min(self.max_pressure, SETPOINTS_MIN.max_pressure, SETPOINTS_MAX.max_pressure),
            peep: clamp_or_min(self.peep, SETPOINTS_MIN.peep, SETPOINTS_MAX.peep),
            respiratory_rate: clamp_or_min(self.respiratory_rate, SETPOINTS_MIN.respiratory_rate, SETPOINTS_MAX.respiratory_rate),
            tidal_volume: clamp_or_min(self.tidal_volume, SETPOINTS_MIN.tidal_volume, SETPOINTS_MAX.tidal_volume),
            ie_ratio: clamp_or_min(self.ie_ratio, SETPOINTS_MIN.ie_ratio, SETPOINTS_MAX.ie_ratio),
        }
    }
}

impl Default for Setpoints {
    fn default() -> Self {
        SETPOINTS_MIN
    }
}

fn clamp_or_min(v: f32, min: f32, max: f32) -> f32 {
    if v.is_nan() {
        min
    } else {
        v.clamp(min, max)
    }
}

/// One acquisition from the sensor port.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSample {
    pub flow: f32,              // L/min, positive towards the patient. NaN on sensor fault
    pub pressure: f32,          // proximal airway pressure, cmH2O
    pub o2_line_pressure: f32,  // kPa
    pub setpoints: Setpoints,
}

/// Published statistics snapshot.  Written once per statistics tick.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RespiratoryStatistics {
    // Instantaneous values
    pub pressure: f32,          // cmH2O
    pub flow: f32,              // L/min
    pub o2_line_pressure: f32,  // kPa
    pub o2_percent: f32,        // no analyser on board, this is the O2 setpoint
    pub inspired_volume: f32,   // mL since the current inspiration started

    // Per breath
    pub peak_pressure: f32,     // cmH2O
    pub mean_pressure: f32,     // cmH2O
    pub peep: f32,              // cmH2O
    pub respiratory_rate: f32,  // breaths/min
    pub ti: f32,                // s
    pub te: f32,                // s
    pub ie_ratio: f32,          // ti/te
    pub minute_volume_inspired: f32,  // L/min
    pub minute_volume_expired: f32,   // L/min
    pub tidal_volume_inspired: f32,   // mL
    pub tidal_volume_expired: f32,    // mL

    pub phase: BreathPhase,
}

impl RespiratoryStatistics {
    pub const ZERO: RespiratoryStatistics = RespiratoryStatistics {
        pressure: 0.0,
        flow: 0.0,
        o2_line_pressure: 0.0,
        o2_percent: 0.0,
        inspired_volume: 0.0,
        peak_pressure: 0.0,
        mean_pressure: 0.0,
        peep: 0.0,
        respiratory_rate: 0.0,
        ti: 0.0,
        te: 0.0,
        ie_ratio: 0.0,
        minute_volume_inspired: 0.0,
        minute_volume_expired: 0.0,
        tidal_volume_inspired: 0.0,
        tidal_volume_expired: 0.0,
        phase: BreathPhase::Expiration,
    };
}

impl RespiratoryStatistics {
    /// Boot state: no pressure has been measured yet.
    pub const UNMEASURED: RespiratoryStatistics = RespiratoryStatistics {
        pressure: f32::NAN,
        o2_line_pressure: f32::NAN,
        ..RespiratoryStatistics::ZERO
    };

    pub fn pressures_measured(&self) -> bool {
        self.pressure.is_finite() && self.o2_line_pressure.is_finite()
    }
}

impl Default for RespiratoryStatistics {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Commanded state of the four pneumatic valves (`true` = open).
///
/// The inspiratory and expiratory channels can only be opened through
/// `set_inspiratory`/`set_expiratory`, which close the opposite channel first,
/// so both are never commanded open together.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ValveOutputs {
    o2_fill: bool,
    air_fill: bool,
    inspiratory: bool,
    expiratory: bool,
}

impl ValveOutputs {
    /// All valves closed.
    pub const CLOSED: ValveOutputs = ValveOutputs {
        o2_fill: false,
        air_fill: false,
        inspiratory: false,
        expiratory: false,
    };

    pub fn o2_fill(&self) -> bool {
        self.o2_fill
    }
    pub fn air_fill(&self) -> bool {
        self.air_fill
    }
    pub fn inspiratory(&self) -> bool {
        self.inspiratory
    }
    pub fn expiratory(&self) -> bool {
        self.expiratory
    }

    pub fn set_o2_fill(&mut self, open: bool) {
        self.o2_fill = open;
    }
    pub fn set_air_fill(&mut self, open: bool) {
        self.air_fill = open;
    }
    pub fn close_fill_valves(&mut self) {
        self.o2_fill = false;
        self.air_fill = false;
    }

    pub fn set_inspiratory(&mut self, open: bool) {
        if open {
            self.expiratory = false;
        }
        self.inspiratory = open;
    }

    pub fn set_expiratory(&mut self, open: bool) {
        if open {
            self.inspiratory = false;
        }
        self.expiratory = open;
    }
}
