//! Sensor port: flow, airway pressure, O2 line pressure and the six
//! operator potentiometers, scaled to physical units.
//!
//! A failed analog conversion keeps the last good pressures and setpoints.
//! Setpoints are smoothed and then clamped into their panel ranges, so a
//! noisy or broken potentiometer can never hand the timing math a rate or
//! ratio outside the ranges it was designed for.

use crate::analog_frontend::{AdcError, AnalogInput, AnalogReadings};
use crate::config::{
    AIRWAY_PRESSURE_SCALE, O2_LINE_PRESSURE_SCALE, SETPOINT_FILTER_LENGTH, SET_IE_SCALE,
    SET_MAX_PRESSURE_SCALE, SET_O2_SCALE, SET_PEEP_SCALE, SET_RR_SCALE, SET_TV_SCALE,
};
use crate::data_structs::{SensorSample, Setpoints};
use crate::signal_processing::MovingAverageFilter;

/// Produces one sample per call.
pub trait SensorPort {
    fn acquire(&mut self) -> SensorSample;
}

/// Flow in L/min, NaN when the sensor failed.
pub trait FlowSource {
    fn flow(&mut self) -> f32;
}

pub trait AnalogSource {
    fn read_volts(&mut self) -> Result<AnalogReadings, AdcError>;
}

type SetpointFilter = MovingAverageFilter<f32, SETPOINT_FILTER_LENGTH>;

struct SetpointFilters {
    primed: bool,
    o2: SetpointFilter,
    max_pressure: SetpointFilter,
    peep: SetpointFilter,
    rr: SetpointFilter,
    tv: SetpointFilter,
    ie: SetpointFilter,
}

impl SetpointFilters {
    fn new() -> SetpointFilters {
        SetpointFilters {
            primed: false,
            o2: SetpointFilter::new(),
            max_pressure: SetpointFilter::new(),
            peep: SetpointFilter::new(),
            rr: SetpointFilter::new(),
            tv: SetpointFilter::new(),
            ie: SetpointFilter::new(),
        }
    }

    fn push(&mut self, raw: Setpoints) -> Setpoints {
        // The first reading fills the window so the output does not ramp from zero
        let primed = self.primed;
        let apply = |f: &mut SetpointFilter, x: f32| if primed { f.push(x) } else { f.fill(x) };
        let out = Setpoints {
            o2_percent: apply(&mut self.o2, raw.o2_percent),
            max_pressure: apply(&mut self.max_pressure, raw.max_pressure),
            peep: apply(&mut self.peep, raw.peep),
            respiratory_rate: apply(&mut self.rr, raw.respiratory_rate),
            tidal_volume: apply(&mut self.tv, raw.tidal_volume),
            ie_ratio: apply(&mut self.ie, raw.ie_ratio),
        };
        self.primed = true;
        out
    }
}

pub struct Sensors<F, A> {
    flow: F,
    analog: A,
    pressure: f32,
    o2_line_pressure: f32,
    setpoints: Setpoints,
    filters: SetpointFilters,
    analog_faults: u32,
}

impl<F: FlowSource, A: AnalogSource> Sensors<F, A> {
    pub fn new(flow: F, analog: A) -> Sensors<F, A> {
        Sensors {
            flow,
            analog,
            pressure: f32::NAN,
            o2_line_pressure: f32::NAN,
            setpoints: Setpoints::default(),
            filters: SetpointFilters::new(),
            analog_faults: 0,
        }
    }

    pub fn analog_fault_count(&self) -> u32 {
        self.analog_faults
    }

    fn update_analog(&mut self, r: &AnalogReadings) {
        self.pressure = AIRWAY_PRESSURE_SCALE.apply(r.volts(AnalogInput::AirwayPressure));
        self.o2_line_pressure = O2_LINE_PRESSURE_SCALE.apply(r.volts(AnalogInput::O2LinePressure));

        let raw = Setpoints {
            o2_percent: SET_O2_SCALE.apply(r.volts(AnalogInput::SetO2)),
            max_pressure: SET_MAX_PRESSURE_SCALE.apply(r.volts(AnalogInput::SetMaxPressure)),
            peep: SET_PEEP_SCALE.apply(r.volts(AnalogInput::SetPeep)),
            respiratory_rate: SET_RR_SCALE.apply(r.volts(AnalogInput::SetRespiratoryRate)),
            tidal_volume: SET_TV_SCALE.apply(r.volts(AnalogInput::SetTidalVolume)),
            ie_ratio: SET_IE_SCALE.apply(r.volts(AnalogInput::SetIeRatio)),
        };
        self.setpoints = self.filters.push(raw).clamped();
    }
}

impl<F: FlowSource, A: AnalogSource> SensorPort for Sensors<F, A> {
    fn acquire(&mut self) -> SensorSample {
        let flow = self.flow.flow();
        match self.analog.read_volts() {
            Ok(readings) => self.update_analog(&readings),
            Err(e) => {
                self.analog_faults = self.analog_faults.wrapping_add(1);
                warn!("analog front end {:?}, fault #{}", e, self.analog_faults);
            }
        }
        SensorSample {
            flow,
            pressure: self.pressure,
            o2_line_pressure: self.o2_line_pressure,
            setpoints: self.setpoints,
        }
    }
}
