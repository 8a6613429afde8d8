// Whole-core scenarios: statistics engine, shared store and valve controller
// running against a simulated lung and reservoir bottle.

use core::cell::Cell;
use core::convert::Infallible;

use embedded_hal::digital::v2::OutputPin;

use ventilator_controller::config::{CONTROL_TICK, STATISTICS_PERIOD};
use ventilator_controller::data_structs::{RespiratoryStatistics, SensorSample, Setpoints};
use ventilator_controller::sensors::SensorPort;
use ventilator_controller::statistics::{StatisticsConfig, StatisticsEngine};
use ventilator_controller::store::SharedStatisticsStore;
use ventilator_controller::time_util::{instant_from_millis, Clock, Instant};
use ventilator_controller::valve_controller::{BreathCyclePhase, ControllerConfig, ValveController};
use ventilator_controller::valve_driver::{ValveBank, ValveState};

const SIM_STEP_MS: u32 = 5;

struct SimClock(Cell<u32>);

impl Clock for SimClock {
    fn now(&self) -> Instant {
        instant_from_millis(self.0.get())
    }
}

struct NullPin;

impl OutputPin for NullPin {
    type Error = Infallible;
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Single compartment lung behind the patient valves, plus the reservoir.
struct Patient {
    compliance: f32,      // mL/cmH2O
    volume: f32,          // mL above zero pressure
    bottle: f32,          // kPa
    flow: f32,            // L/min, last step
    setpoints: Setpoints,
}

impl Patient {
    const INSPIRATORY_FLOW: f32 = 40.0; // L/min while the inspiratory valve is open
    const EXPIRATORY_CONDUCTANCE: f32 = 10.0; // L/min per cmH2O
    const FILL_RATE: f32 = 400.0; // kPa/s with a fill valve open
    const BOTTLE_DRAIN: f32 = 0.2; // kPa per mL delivered

    fn new(compliance: f32, setpoints: Setpoints) -> Patient {
        Patient {
            compliance,
            volume: 0.0,
            bottle: 150.0,
            flow: 0.0,
            setpoints,
        }
    }

    fn pressure(&self) -> f32 {
        self.volume / self.compliance
    }

    /// Pressure rise with the inspiratory valve open, cmH2O/s.
    fn inspiratory_slope(&self) -> f32 {
        Self::INSPIRATORY_FLOW * 1000.0 / 60.0 / self.compliance
    }

    fn advance(&mut self, dt_ms: u32, valves: [ValveState; 4]) {
        let [o2, air, insp, exp] = valves.map(|v| v == ValveState::Open);
        let dt_s = dt_ms as f32 / 1000.0;

        self.flow = if insp {
            Self::INSPIRATORY_FLOW
        } else if exp {
            -Self::EXPIRATORY_CONDUCTANCE * self.pressure()
        } else {
            0.0
        };
        let dv = self.flow * 1000.0 / 60.0 * dt_s;
        self.volume = (self.volume + dv).max(0.0);
        if insp {
            self.bottle -= dv * Self::BOTTLE_DRAIN;
        }
        if o2 || air {
            self.bottle += Self::FILL_RATE * dt_s;
        }
    }
}

impl SensorPort for Patient {
    fn acquire(&mut self) -> SensorSample {
        SensorSample {
            flow: self.flow,
            pressure: self.pressure(),
            o2_line_pressure: self.bottle,
            setpoints: self.setpoints,
        }
    }
}

struct Run {
    /// Latest published statistics.
    stats: RespiratoryStatistics,
    /// Pressure the lung can gain between two control decisions.
    max_overshoot: f32,
    /// Highest pressure the patient actually saw after warm-up.
    max_pressure: f32,
    o2_fills: u32,
    breaths: u32,
}

fn simulate(compliance: f32, setpoints: Setpoints, duration_ms: u32) -> Run {
    let clock = SimClock(Cell::new(0));
    let store = SharedStatisticsStore::new();
    let mut patient = Patient::new(compliance, setpoints);
    let mut valves = ValveBank::new(NullPin, NullPin, NullPin, NullPin).unwrap();
    let mut engine = StatisticsEngine::new(StatisticsConfig::default(), clock.now());
    let mut controller = ValveController::new(ControllerConfig::default(), clock.now());

    let mut next_control = 0u32;
    let mut run = Run {
        stats: RespiratoryStatistics::ZERO,
        max_overshoot: worst_case_overshoot(patient.inspiratory_slope()),
        max_pressure: 0.0,
        o2_fills: 0,
        breaths: 0,
    };
    let mut last_phase = controller.phase();
    let mut o2_was_open = false;

    while clock.0.get() < duration_ms {
        clock.0.set(clock.0.get() + SIM_STEP_MS);
        let t = clock.0.get();
        patient.advance(SIM_STEP_MS, valves.states());

        engine.service(&clock, &mut patient, &store);

        if t >= next_control {
            let tick = controller.service(&clock, &store, &mut valves);
            next_control = t + tick.delay().to_millis();
        }

        let [o2, _, insp, exp] = valves.states();
        assert!(
            !(insp == ValveState::Open && exp == ValveState::Open),
            "both patient valves open at {} ms",
            t
        );

        if controller.phase() != last_phase {
            if controller.phase() == BreathCyclePhase::Inspiration {
                run.breaths += 1;
            }
            last_phase = controller.phase();
        }
        let o2_open = o2 == ValveState::Open;
        if o2_open && !o2_was_open {
            run.o2_fills += 1;
        }
        o2_was_open = o2_open;

        if t > duration_ms / 2 {
            run.max_pressure = run.max_pressure.max(patient.pressure());
        }
    }
    run.stats = store.read().unwrap().statistics;
    run
}

/// The limit is seen at most one statistics period after it was crossed
/// and acted on at most one control tick after that.
fn worst_case_overshoot(slope: f32) -> f32 {
    let latency_ms = STATISTICS_PERIOD.to_millis() + CONTROL_TICK.to_millis();
    slope * latency_ms as f32 / 1000.0
}

fn setpoints() -> Setpoints {
    Setpoints {
        o2_percent: 60.0,
        max_pressure: 30.0,
        peep: 5.0,
        respiratory_rate: 15.0,
        tidal_volume: 500.0,
        ie_ratio: 0.5,
    }
}

#[test]
fn compliant_lung_is_volume_limited_at_the_set_rate() {
    let run = simulate(50.0, setpoints(), 60_000);
    let s = run.stats;

    assert!((s.respiratory_rate - 15.0).abs() < 0.5, "rr {}", s.respiratory_rate);
    assert!(
        s.tidal_volume_inspired >= 480.0 && s.tidal_volume_inspired <= 600.0,
        "vti {}",
        s.tidal_volume_inspired
    );
    assert!(s.ie_ratio > 0.4 && s.ie_ratio < 0.6, "ie {}", s.ie_ratio);
    assert!(s.peep > 3.0 && s.peep <= 5.5, "peep {}", s.peep);
    assert!(run.max_pressure < 30.0);

    // 15/min for 60 s
    assert!(run.breaths >= 14 && run.breaths <= 15, "breaths {}", run.breaths);
    // The bottle is topped up with O2 in every expiration
    assert!(run.o2_fills >= run.breaths);
}

#[test]
fn stiff_lung_is_pressure_limited() {
    let run = simulate(10.0, setpoints(), 40_000);
    let s = run.stats;

    // 66.7 cmH2O/s over 50 + 15 ms: about 4.3 cmH2O above the limit
    let bound = setpoints().max_pressure + run.max_overshoot + 0.01;
    assert!(run.max_overshoot < 4.5);
    assert!(s.peak_pressure >= 30.0 && s.peak_pressure <= bound, "peak {}", s.peak_pressure);
    assert!(run.max_pressure <= bound, "max {} > {}", run.max_pressure, bound);
    assert!(
        s.tidal_volume_inspired > 200.0 && s.tidal_volume_inspired < 420.0,
        "vti {}",
        s.tidal_volume_inspired
    );
    assert!((s.respiratory_rate - 15.0).abs() < 0.5, "rr {}", s.respiratory_rate);
}

#[test]
fn faster_rate_and_longer_inspiration_are_followed() {
    let sp = Setpoints {
        respiratory_rate: 20.0,
        ie_ratio: 1.0,
        tidal_volume: 400.0,
        ..setpoints()
    };
    let run = simulate(50.0, sp, 45_000);
    let s = run.stats;

    assert!((s.respiratory_rate - 20.0).abs() < 0.7, "rr {}", s.respiratory_rate);
    assert!(s.ie_ratio > 0.85 && s.ie_ratio < 1.15, "ie {}", s.ie_ratio);
}
