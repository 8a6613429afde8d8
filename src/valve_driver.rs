use embedded_hal::digital::v2::OutputPin;

use crate::data_structs::ValveOutputs;

/// Electrical level that opens a valve.  The patient valves are wired
/// active-low so that a lost drive leaves the inspiratory path closed and
/// the expiratory path open.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValveState {
    Open,
    Closed,
}

pub struct ValveDriver<P: OutputPin> {
    valve_pin: P,
    polarity: Polarity,
    state: ValveState,
}

impl<P: OutputPin> ValveDriver<P> {
    pub fn new(valve_pin: P, polarity: Polarity) -> ValveDriver<P> {
        ValveDriver {
            valve_pin,
            polarity,
            state: ValveState::Closed,
        }
    }

    pub fn set_valve_state(&mut self, state: ValveState) -> Result<(), P::Error> {
        match (state, self.polarity) {
            (ValveState::Open, Polarity::ActiveHigh) | (ValveState::Closed, Polarity::ActiveLow) => {
                self.valve_pin.set_high()?
            }
            (ValveState::Open, Polarity::ActiveLow) | (ValveState::Closed, Polarity::ActiveHigh) => {
                self.valve_pin.set_low()?
            }
        }
        self.state = state;
        Ok(())
    }

    pub fn state(&self) -> ValveState {
        self.state
    }
}

/// The four pneumatic valves.
pub struct ValveBank<P: OutputPin> {
    o2: ValveDriver<P>,
    air: ValveDriver<P>,
    inspiratory: ValveDriver<P>,
    expiratory: ValveDriver<P>,
}

impl<P: OutputPin> ValveBank<P> {
    /// Takes the pins and drives every valve closed.
    pub fn new(o2: P, air: P, inspiratory: P, expiratory: P) -> Result<ValveBank<P>, P::Error> {
        let mut bank = ValveBank {
            o2: ValveDriver::new(o2, Polarity::ActiveHigh),
            air: ValveDriver::new(air, Polarity::ActiveHigh),
            inspiratory: ValveDriver::new(inspiratory, Polarity::ActiveLow),
            expiratory: ValveDriver::new(expiratory, Polarity::ActiveLow),
        };
        for valve in bank.valves_mut() {
            valve.set_valve_state(ValveState::Closed)?;
        }
        Ok(bank)
    }

    fn valves_mut(&mut self) -> [&mut ValveDriver<P>; 4] {
        [&mut self.o2, &mut self.air, &mut self.inspiratory, &mut self.expiratory]
    }

    /// Drives the pins to match `outputs`.  Every channel that has to close is
    /// closed before any channel is opened, so the inspiratory and expiratory
    /// valves are never open together on the wire either.
    pub fn apply(&mut self, outputs: &ValveOutputs) -> Result<(), P::Error> {
        let wanted = [
            outputs.o2_fill(),
            outputs.air_fill(),
            outputs.inspiratory(),
            outputs.expiratory(),
        ];
        let mut valves = self.valves_mut();
        for (valve, &open) in valves.iter_mut().zip(wanted.iter()) {
            if !open && valve.state() != ValveState::Closed {
                valve.set_valve_state(ValveState::Closed)?;
            }
        }
        for (valve, &open) in valves.iter_mut().zip(wanted.iter()) {
            if open && valve.state() != ValveState::Open {
                valve.set_valve_state(ValveState::Open)?;
            }
        }
        Ok(())
    }

    /// Current (o2, air, inspiratory, expiratory) states.
    pub fn states(&self) -> [ValveState; 4] {
        [
            self.o2.state(),
            self.air.state(),
            self.inspiratory.state(),
            self.expiratory.state(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    // (pin id, level) in write order
    type Log = Rc<RefCell<Vec<(u8, bool)>>>;

    struct MockPin {
        id: u8,
        log: Log,
    }

    impl OutputPin for MockPin {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push((self.id, false));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push((self.id, true));
            Ok(())
        }
    }

    const O2: u8 = 0;
    const AIR: u8 = 1;
    const INSP: u8 = 2;
    const EXP: u8 = 3;

    fn bank() -> (ValveBank<MockPin>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let pin = |id| MockPin { id, log: log.clone() };
        let bank = ValveBank::new(pin(O2), pin(AIR), pin(INSP), pin(EXP)).unwrap();
        (bank, log)
    }

    #[test]
    fn starts_closed_with_polarity_applied() {
        let (bank, log) = bank();
        assert_eq!(
            log.borrow().as_slice(),
            &[(O2, false), (AIR, false), (INSP, true), (EXP, true)]
        );
        assert_eq!(bank.states(), [ValveState::Closed; 4]);
    }

    #[test]
    fn patient_valves_are_active_low_fill_valves_active_high() {
        let (mut bank, log) = bank();
        log.borrow_mut().clear();

        let mut v = ValveOutputs::CLOSED;
        v.set_o2_fill(true);
        v.set_expiratory(true);
        bank.apply(&v).unwrap();
        assert_eq!(log.borrow().as_slice(), &[(O2, true), (EXP, false)]);
    }

    #[test]
    fn switching_patient_valves_closes_before_opening() {
        let (mut bank, log) = bank();
        let mut v = ValveOutputs::CLOSED;
        v.set_expiratory(true);
        bank.apply(&v).unwrap();
        log.borrow_mut().clear();

        v.set_inspiratory(true);
        bank.apply(&v).unwrap();
        assert_eq!(log.borrow().as_slice(), &[(EXP, true), (INSP, false)]);

        log.borrow_mut().clear();
        v.set_expiratory(true);
        bank.apply(&v).unwrap();
        assert_eq!(log.borrow().as_slice(), &[(INSP, true), (EXP, false)]);
    }

    #[test]
    fn unchanged_outputs_do_not_touch_the_pins() {
        let (mut bank, log) = bank();
        let mut v = ValveOutputs::CLOSED;
        v.set_air_fill(true);
        bank.apply(&v).unwrap();
        log.borrow_mut().clear();
        bank.apply(&v).unwrap();
        assert!(log.borrow().is_empty());
    }
}
