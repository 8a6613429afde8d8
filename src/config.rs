// Build-time configuration of the ventilator core.

use crate::data_structs::Setpoints;
use crate::signal_processing::LinearScale;
use crate::time_util::Duration;

// ------------------------------------------------------------
// Task cadence
// ------------------------------------------------------------

// Statistics time granularity.  Flow is integrated with this as dt.
pub const STATISTICS_PERIOD: Duration = Duration::millis(50);

// Telemetry line period
pub const MESSAGE_PERIOD: Duration = Duration::millis(50);

// Valve control loop tick (one scheduler tick)
pub const CONTROL_TICK: Duration = Duration::millis(15);

// Delay before the valve controller re-reads a contended statistics store
pub const STORE_RETRY_DELAY: Duration = Duration::millis(15);

// try_lock attempts before a store access counts as contended
pub const STORE_ACQUIRE_SPINS: u32 = 64;

// try_lock attempts before a telemetry line is dropped
pub const SERIAL_ACQUIRE_SPINS: u32 = 64;

// ------------------------------------------------------------
// Breath timing
// ------------------------------------------------------------

// Ceilings on the padding holds.  At 12/min and 1:3 the nominal
// expiration is 3750 ms and the nominal inspiration at 1:1 is 2500 ms.
pub const MAX_PEEP_DELAY_MS: u32 = 4_000;
pub const MAX_PLATEAU_DELAY_MS: u32 = 2_500;

// ------------------------------------------------------------
// Oxygen mixing
// ------------------------------------------------------------

// O2 line (reservoir) pressure that ends the refill, kPa
pub const BOTTLE_TARGET_KPA: f32 = 250.0;

pub const O2_AMBIENT_PERCENT: f32 = 21.0;
pub const O2_PURE_PERCENT: f32 = 100.0;
pub const O2_SPAN_PERCENT: f32 = O2_PURE_PERCENT - O2_AMBIENT_PERCENT;

// ------------------------------------------------------------
// Operator setpoint ranges
// ------------------------------------------------------------

pub const SETPOINTS_MIN: Setpoints = Setpoints {
    o2_percent: 21.0,
    max_pressure: 10.0,
    peep: 5.0,
    respiratory_rate: 12.0,
    tidal_volume: 200.0,
    ie_ratio: 0.33,
};

pub const SETPOINTS_MAX: Setpoints = Setpoints {
    o2_percent: 100.0,
    max_pressure: 40.0,
    peep: 20.0,
    respiratory_rate: 20.0,
    tidal_volume: 1000.0,
    ie_ratio: 1.0,
};

// Length of the moving average applied to the potentiometers
pub const SETPOINT_FILTER_LENGTH: usize = 8;

// ------------------------------------------------------------
// Analog scaling, volts -> physical units
// ------------------------------------------------------------

// MPX5010, 10 kPa full scale
pub const AIRWAY_PRESSURE_SCALE: LinearScale = LinearScale::new(0.2, 4.7, 0.0, 101.978);

// MPX5700AP, 15..700 kPa
pub const O2_LINE_PRESSURE_SCALE: LinearScale = LinearScale::new(0.2, 4.7, 10.0, 700.0);

pub const SET_O2_SCALE: LinearScale = LinearScale::new(0.0, 5.0, 21.0, 100.0);
pub const SET_MAX_PRESSURE_SCALE: LinearScale = LinearScale::new(0.0, 5.0, 10.0, 40.0);
pub const SET_PEEP_SCALE: LinearScale = LinearScale::new(0.0, 5.0, 5.0, 20.0);
pub const SET_RR_SCALE: LinearScale = LinearScale::new(0.0, 5.0, 12.0, 20.0);
pub const SET_TV_SCALE: LinearScale = LinearScale::new(0.0, 5.0, 200.0, 1000.0);
// Knob fully left is 1:1
pub const SET_IE_SCALE: LinearScale = LinearScale::new(0.0, 5.0, 1.0, 0.33);
