// =============  Sensirion SFM3300 flow sensor, I2C ===========================

use embedded_hal::blocking::i2c::{Read, Write};

use crate::sensors::FlowSource;

const I2C_BUS_ADDRESS: u8 = 0x40;
const START_CONTINUOUS_MEASUREMENT: [u8; 2] = [0x10, 0x00];

// Output scaling per datasheet
const FLOW_OFFSET: f32 = 32_768.0;
const FLOW_SCALE_SLM: f32 = 120.0;

const CRC8_POLY: u8 = 0x31;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowSensorError {
    I2c,
    Crc,
}

pub struct FlowSensor<I> {
    i2c: I,
    faults: u32,
}

impl<I, E> FlowSensor<I>
where
    I: Read<Error = E> + Write<Error = E>,
{
    pub fn new(i2c: I) -> FlowSensor<I> {
        FlowSensor { i2c, faults: 0 }
    }

    /// Starts continuous measurement.  Every following read returns the
    /// latest sample.
    pub fn init(&mut self) -> Result<(), FlowSensorError> {
        self.i2c
            .write(I2C_BUS_ADDRESS, &START_CONTINUOUS_MEASUREMENT)
            .map_err(|_| FlowSensorError::I2c)
    }

    /// Reads one sample in standard litres per minute.
    pub fn read(&mut self) -> Result<f32, FlowSensorError> {
        let mut buf = [0u8; 3];
        self.i2c
            .read(I2C_BUS_ADDRESS, &mut buf)
            .map_err(|_| FlowSensorError::I2c)?;
        if crc8(&buf[..2]) != buf[2] {
            return Err(FlowSensorError::Crc);
        }
        Ok(raw_to_slm(u16::from_be_bytes([buf[0], buf[1]])))
    }

    /// Like `read`, but a failed read counts a fault, restarts the sensor and
    /// reports NaN.
    pub fn measure(&mut self) -> f32 {
        match self.read() {
            Ok(slm) => slm,
            Err(e) => {
                self.faults = self.faults.wrapping_add(1);
                warn!("flow sensor {:?}, fault #{}", e, self.faults);
                if self.init().is_err() {
                    warn!("flow sensor restart failed");
                }
                f32::NAN
            }
        }
    }

    pub fn fault_count(&self) -> u32 {
        self.faults
    }
}

impl<I, E> FlowSource for FlowSensor<I>
where
    I: Read<Error = E> + Write<Error = E>,
{
    fn flow(&mut self) -> f32 {
        self.measure()
    }
}

// helper functions
pub fn raw_to_slm(raw: u16) -> f32 {
    (raw as f32 - FLOW_OFFSET) / FLOW_SCALE_SLM
}

/// CRC-8 as used by the Sensirion sensors: poly 0x31, init 0x00, no reflection.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Debug)]
    struct BusError;

    #[derive(Default)]
    struct MockBus {
        reads: VecDeque<Result<[u8; 3], BusError>>,
        writes: Vec<(u8, Vec<u8>)>,
    }

    impl Read for MockBus {
        type Error = BusError;
        fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
            assert_eq!(address, 0x40);
            let bytes = self.reads.pop_front().unwrap_or(Err(BusError))?;
            buffer.copy_from_slice(&bytes);
            Ok(())
        }
    }

    impl Write for MockBus {
        type Error = BusError;
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    fn sensor(reads: Vec<Result<[u8; 3], BusError>>) -> FlowSensor<MockBus> {
        FlowSensor::new(MockBus {
            reads: reads.into_iter().collect(),
            writes: Vec::new(),
        })
    }

    #[test]
    fn crc8_known_vectors() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x13);
        assert_eq!(crc8(&[0x80, 0x00]), 0x23);
    }

    #[test]
    fn converts_raw_counts_to_slm() {
        assert_eq!(raw_to_slm(0x8000), 0.0);
        assert!((raw_to_slm(0x812C) - 2.5).abs() < 1e-6);
        assert!((raw_to_slm(0x7ED4) + 2.5).abs() < 1e-6);
    }

    #[test]
    fn init_starts_continuous_measurement() {
        let mut s = sensor(Vec::new());
        s.init().unwrap();
        assert_eq!(s.i2c.writes, vec![(0x40, vec![0x10, 0x00])]);
    }

    #[test]
    fn good_reads_report_signed_flow() {
        let mut s = sensor(vec![Ok([0x81, 0x2C, 0x2C]), Ok([0x7E, 0xD4, 0x96])]);
        assert!((s.measure() - 2.5).abs() < 1e-6);
        assert!((s.measure() + 2.5).abs() < 1e-6);
        assert_eq!(s.fault_count(), 0);
    }

    #[test]
    fn crc_mismatch_is_a_fault() {
        let mut s = sensor(vec![Ok([0x81, 0x2C, 0x2D])]);
        assert_eq!(s.read(), Err(FlowSensorError::Crc));
    }

    #[test]
    fn faults_report_nan_count_and_restart_the_sensor() {
        let mut s = sensor(vec![
            Ok([0x81, 0x2C, 0x00]),
            Err(BusError),
            Ok([0x81, 0x2C, 0x2C]),
        ]);
        assert!(s.measure().is_nan());
        assert!(s.measure().is_nan());
        assert_eq!(s.fault_count(), 2);
        // One restart per fault
        assert_eq!(s.i2c.writes.len(), 2);
        assert!((s.flow() - 2.5).abs() < 1e-6);
        assert_eq!(s.fault_count(), 2);
    }
}
