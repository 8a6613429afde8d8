//! Breathing cycle state machine.
//!
//! One breath is `Expiration -> PeepDelay -> Inspiration -> PlateauDelay`,
//! forever.  The active phases end on measured conditions; the two delay
//! phases pad them up to the nominal share of `60 / RR` seconds (see
//! [`crate::breath_timing`]).
//!
//! * Expiration: expiratory valve open, the O2 mixer refills the bottle.
//!   Reaching PEEP closes the expiratory valve and latches; the mixer latches
//!   when the bottle is full.  The phase ends when both have latched.
//! * Inspiration: inspiratory valve open.  Ends on whichever comes first,
//!   the pressure limit or the tidal volume.
//!
//! Until both pressures have been measured the boot configuration is held.
//! No phase has a timeout.  A sensor that never reaches its threshold holds
//! the current valve configuration.

use embedded_hal::digital::v2::OutputPin;

use crate::breath_timing::TimingCompensator;
use crate::config::{BOTTLE_TARGET_KPA, CONTROL_TICK, MAX_PEEP_DELAY_MS, MAX_PLATEAU_DELAY_MS};
use crate::data_structs::{BreathPhase, Setpoints, ValveOutputs};
use crate::oxygen_mixer::OxygenMixingAutomat;
use crate::store::{ContentionPolicy, SharedStatisticsStore, StoreError, StoreSnapshot, READER_POLICY};
use crate::time_util::{elapsed, Clock, Duration, Instant};
use crate::valve_driver::ValveBank;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BreathCyclePhase {
    Expiration,
    PeepDelay,
    Inspiration,
    PlateauDelay,
}

impl BreathCyclePhase {
    /// Phase flag handed to the statistics engine.  The plateau belongs to
    /// the inspiration, the PEEP hold to the expiration.
    pub fn breath_phase(self) -> BreathPhase {
        match self {
            BreathCyclePhase::Inspiration | BreathCyclePhase::PlateauDelay => BreathPhase::Inspiration,
            BreathCyclePhase::Expiration | BreathCyclePhase::PeepDelay => BreathPhase::Expiration,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ControllerConfig {
    pub control_tick: Duration,
    pub bottle_target_kpa: f32,
    pub max_peep_delay: Duration,
    pub max_plateau_delay: Duration,
    pub contention: ContentionPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            control_tick: CONTROL_TICK,
            bottle_target_kpa: BOTTLE_TARGET_KPA,
            max_peep_delay: Duration::millis(MAX_PEEP_DELAY_MS),
            max_plateau_delay: Duration::millis(MAX_PLATEAU_DELAY_MS),
            contention: READER_POLICY,
        }
    }
}

/// What the controller acts on, taken from one consistent store snapshot.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ControlInputs {
    pub pressure: f32,          // cmH2O
    pub o2_line_pressure: f32,  // kPa
    pub inspired_volume: f32,   // mL since the measured inspiration started
    /// Phase the statistics engine integrated `inspired_volume` under.
    pub measured_phase: BreathPhase,
    pub setpoints: Setpoints,
}

impl From<&StoreSnapshot> for ControlInputs {
    fn from(snapshot: &StoreSnapshot) -> Self {
        ControlInputs {
            pressure: snapshot.statistics.pressure,
            o2_line_pressure: snapshot.statistics.o2_line_pressure,
            inspired_volume: snapshot.statistics.inspired_volume,
            measured_phase: snapshot.statistics.phase,
            setpoints: snapshot.setpoints,
        }
    }
}

/// When the control task runs next.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlTick {
    Next(Duration),
    /// The store was busy; nothing was acted on.
    Retry(Duration),
}

impl ControlTick {
    pub fn delay(self) -> Duration {
        match self {
            ControlTick::Next(d) | ControlTick::Retry(d) => d,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct BreathCycleState {
    phase: BreathCyclePhase,
    phase_started: Instant,
    hold: Duration,
    peep_reached: bool,
}

pub struct ValveController {
    config: ControllerConfig,
    state: BreathCycleState,
    timing: TimingCompensator,
    mixer: OxygenMixingAutomat,
    outputs: ValveOutputs,
}

impl ValveController {
    pub fn new(config: ControllerConfig, now: Instant) -> ValveController {
        let mut controller = ValveController {
            config,
            state: BreathCycleState {
                phase: BreathCyclePhase::Expiration,
                phase_started: now,
                hold: Duration::from_ticks(0),
                peep_reached: false,
            },
            timing: TimingCompensator::new(config.max_peep_delay, config.max_plateau_delay),
            mixer: OxygenMixingAutomat::new(config.bottle_target_kpa),
            outputs: ValveOutputs::CLOSED,
        };
        controller.enter_expiration(now);
        controller
    }

    pub fn phase(&self) -> BreathCyclePhase {
        self.state.phase
    }

    pub fn breath_phase(&self) -> BreathPhase {
        self.state.phase.breath_phase()
    }

    /// Last (PEEP delay, plateau delay) applied.
    pub fn delays(&self) -> (Duration, Duration) {
        self.timing.delays()
    }

    pub fn outputs(&self) -> ValveOutputs {
        self.outputs
    }

    /// Runs one control tick.  A phase entered on this tick is first tested
    /// for its exit condition on the next tick.
    pub fn step(&mut self, now: Instant, inputs: &ControlInputs) -> ValveOutputs {
        let sp = &inputs.setpoints;
        match self.state.phase {
            BreathCyclePhase::Expiration => {
                if !self.state.peep_reached && inputs.pressure <= sp.peep {
                    self.outputs.set_expiratory(false);
                    self.state.peep_reached = true;
                    trace!("peep reached at {} cmH2O", inputs.pressure);
                }
                self.mixer.step(inputs.o2_line_pressure, sp.o2_percent, &mut self.outputs);

                if self.state.peep_reached && self.mixer.fill_reached() {
                    let actual = elapsed(now, self.state.phase_started);
                    let hold = self.timing.expiration_delay(sp, actual);
                    if hold.ticks() == 0 {
                        self.enter_inspiration(now);
                    } else {
                        self.enter_hold(BreathCyclePhase::PeepDelay, now, hold);
                    }
                }
            }
            BreathCyclePhase::PeepDelay => {
                if elapsed(now, self.state.phase_started) >= self.state.hold {
                    self.enter_inspiration(now);
                }
            }
            BreathCyclePhase::Inspiration => {
                let pressure_reached = inputs.pressure >= sp.max_pressure;
                // The volume only belongs to this breath once the statistics
                // engine has seen the inspiration edge
                let volume_reached = inputs.measured_phase == BreathPhase::Inspiration
                    && inputs.inspired_volume >= sp.tidal_volume;

                if pressure_reached || volume_reached {
                    self.outputs.set_inspiratory(false);
                    let actual = elapsed(now, self.state.phase_started);
                    debug!(
                        "inspiration end: {} ms, p {} cmH2O, v {} mL",
                        actual.to_millis(),
                        inputs.pressure,
                        inputs.inspired_volume
                    );
                    let hold = self.timing.inspiration_delay(sp, actual);
                    if hold.ticks() == 0 {
                        self.enter_expiration(now);
                    } else {
                        self.enter_hold(BreathCyclePhase::PlateauDelay, now, hold);
                    }
                }
            }
            BreathCyclePhase::PlateauDelay => {
                if elapsed(now, self.state.phase_started) >= self.state.hold {
                    self.enter_expiration(now);
                }
            }
        }
        self.outputs
    }

    fn enter_expiration(&mut self, now: Instant) {
        self.outputs.set_inspiratory(false);
        self.outputs.close_fill_valves();
        self.outputs.set_expiratory(true);
        self.mixer.reset();
        self.state = BreathCycleState {
            phase: BreathCyclePhase::Expiration,
            phase_started: now,
            hold: Duration::from_ticks(0),
            peep_reached: false,
        };
    }

    fn enter_inspiration(&mut self, now: Instant) {
        self.outputs.close_fill_valves();
        self.outputs.set_expiratory(false);
        self.outputs.set_inspiratory(true);
        self.state.phase = BreathCyclePhase::Inspiration;
        self.state.phase_started = now;
        self.state.hold = Duration::from_ticks(0);
    }

    fn enter_hold(&mut self, phase: BreathCyclePhase, now: Instant, hold: Duration) {
        trace!("{:?} for {} ms", phase, hold.to_millis());
        self.state.phase = phase;
        self.state.phase_started = now;
        self.state.hold = hold;
    }

    /// Control task body: read the store, step, publish the phase flag and
    /// drive the valves.
    pub fn service<C: Clock, P: OutputPin>(
        &mut self,
        clock: &C,
        store: &SharedStatisticsStore,
        valves: &mut ValveBank<P>,
    ) -> ControlTick {
        let snapshot = match store.read() {
            Ok(snapshot) => snapshot,
            Err(StoreError::Contended) => {
                return match self.config.contention {
                    ContentionPolicy::RetryAfter(d) => ControlTick::Retry(d),
                    ContentionPolicy::DropTick => ControlTick::Next(self.config.control_tick),
                };
            }
        };

        // Nothing measured yet: hold the boot configuration
        let outputs = if snapshot.is_measured() {
            self.step(clock.now(), &ControlInputs::from(&snapshot))
        } else {
            self.outputs
        };
        store.set_phase(self.breath_phase());

        if valves.apply(&outputs).is_err() {
            error!("valve drive failed");
        }
        ControlTick::Next(self.config.control_tick)
    }
}
