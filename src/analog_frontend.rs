// =============  AD7994 analog front end, I2C ===========================
//
// Two 4-channel 12 bit converters share one CONVST line.  Each CONVST pulse
// converts the next channel of the sequence on both devices, so four pulses
// give all eight inputs.

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::i2c::{Read, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::sensors::AnalogSource;

const I2C_BUS_ADDRESS_A: u8 = 0b_0010_0010; // AD7994-0, AS pin floating
const I2C_BUS_ADDRESS_B: u8 = 0b_0010_0100; // AD7994-1, AS pin to GND
const I2C_CONFIG_REG_ADDRESS: u8 = 0b_0000_0010; // Select the Config register for write
const I2C_CONFIG_REG_DATA: u8 = 0b_1111_1000; // Convert channels 1..4, filter on
const I2C_CONVERSION_RESULT_REG_ADDRESS: u8 = 0b_0000_0000; // Select the conversion result register for subsequent reads.
const I2C_CONVERSION_RESULT_DATA_MASK: u16 = 0b_0000_1111_1111_1111; // Mask off the highest four bits
const I2C_CONVERSION_RESULT_CHANNEL_MASK: u8 = 0b_0000_0011; // Channel id, after shifting the high byte

const CHANNELS_PER_DEVICE: usize = 4;

// Sensor scaling from AD count to volts per Vref
const ADC_VREF: f32 = 5.0;

// CONVST high time to power up, then conversion time before the read
const CONVST_PULSE_US: u32 = 1;
const CONVERSION_US: u32 = 2;

/// The eight analog inputs, in (device, channel) order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogInput {
    AirwayPressure,
    O2LinePressure,
    SetO2,
    SetMaxPressure,
    SetPeep,
    SetRespiratoryRate,
    SetTidalVolume,
    SetIeRatio,
}

impl AnalogInput {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcError {
    I2c,
    ConvStart,
}

/// One set of converted voltages.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnalogReadings {
    volts: [f32; 2 * CHANNELS_PER_DEVICE],
}

impl AnalogReadings {
    pub fn from_volts(volts: [f32; 2 * CHANNELS_PER_DEVICE]) -> AnalogReadings {
        AnalogReadings { volts }
    }

    pub fn volts(&self, input: AnalogInput) -> f32 {
        self.volts[input.index()]
    }
}

pub struct AnalogFrontEnd<I, P, D> {
    i2c: I,
    convst_pin: P,
    delay: D,
    volts: [f32; 2 * CHANNELS_PER_DEVICE], // A place to cache the results
}

impl<I, E, P, D> AnalogFrontEnd<I, P, D>
where
    I: Read<Error = E> + Write<Error = E>,
    P: OutputPin,
    D: DelayUs<u32>,
{
    pub fn new(i2c: I, convst_pin: P, delay: D) -> AnalogFrontEnd<I, P, D> {
        AnalogFrontEnd {
            i2c,
            convst_pin,
            delay,
            volts: [0.0; 2 * CHANNELS_PER_DEVICE],
        }
    }

    pub fn init(&mut self) -> Result<(), AdcError> {
        self.convst_pin.set_low().map_err(|_| AdcError::ConvStart)?;
        for address in [I2C_BUS_ADDRESS_A, I2C_BUS_ADDRESS_B] {
            // Write to the AD7994 Configuration register
            self.i2c
                .write(address, &[I2C_CONFIG_REG_ADDRESS, I2C_CONFIG_REG_DATA])
                .map_err(|_| AdcError::I2c)?;
            // Point at the conversion result register for the reads that follow
            self.i2c
                .write(address, &[I2C_CONVERSION_RESULT_REG_ADDRESS])
                .map_err(|_| AdcError::I2c)?;
        }
        Ok(())
    }

    fn trigger_conversion(&mut self) -> Result<(), AdcError> {
        self.convst_pin.set_high().map_err(|_| AdcError::ConvStart)?; // Power up the converter
        self.delay.delay_us(CONVST_PULSE_US);
        self.convst_pin.set_low().map_err(|_| AdcError::ConvStart)?; // Falling edge starts the conversion
        self.delay.delay_us(CONVERSION_US);
        Ok(())
    }

    fn read_one_channel(&mut self, address: u8) -> Result<(usize, f32), AdcError> {
        let mut buf = [0; 2];
        self.i2c.read(address, &mut buf).map_err(|_| AdcError::I2c)?;
        let channel_index = raw_to_channel_index(buf[0]) as usize;
        let volts = counts_to_volts(raw_to_counts(buf[0], buf[1]));
        Ok((channel_index, volts))
    }

    /// Converts all eight inputs.  The results are placed by the channel id
    /// the converter reports, not by read order.
    pub fn acquire(&mut self) -> Result<AnalogReadings, AdcError> {
        for _ in 0..CHANNELS_PER_DEVICE {
            self.trigger_conversion()?;
            let (ch, v) = self.read_one_channel(I2C_BUS_ADDRESS_A)?;
            self.volts[ch] = v;
            let (ch, v) = self.read_one_channel(I2C_BUS_ADDRESS_B)?;
            self.volts[CHANNELS_PER_DEVICE + ch] = v;
        }
        Ok(AnalogReadings::from_volts(self.volts))
    }
}

impl<I, E, P, D> AnalogSource for AnalogFrontEnd<I, P, D>
where
    I: Read<Error = E> + Write<Error = E>,
    P: OutputPin,
    D: DelayUs<u32>,
{
    fn read_volts(&mut self) -> Result<AnalogReadings, AdcError> {
        self.acquire()
    }
}

// helper functions
pub fn raw_to_channel_index(high_word: u8) -> u8 {
    (high_word >> 4) & I2C_CONVERSION_RESULT_CHANNEL_MASK
}
pub fn raw_to_counts(high_word: u8, low_word: u8) -> u16 {
    (((high_word as u16) << 8) | low_word as u16) & I2C_CONVERSION_RESULT_DATA_MASK
}
pub fn counts_to_volts(counts: u16) -> f32 {
    (counts as f32) / 4095.0 * ADC_VREF
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::vec::Vec;

    #[derive(Debug)]
    struct BusError;

    // Each device hands out its four channels in sequence, starting at
    // `next`; counts are 900 * (channel + 1) plus 50 for device B.
    struct MockAdcs {
        next: [u8; 2],
        writes: Vec<(u8, Vec<u8>)>,
        fail_reads: bool,
    }

    impl Read for MockAdcs {
        type Error = BusError;
        fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
            if self.fail_reads {
                return Err(BusError);
            }
            let dev = match address {
                I2C_BUS_ADDRESS_A => 0,
                I2C_BUS_ADDRESS_B => 1,
                _ => return Err(BusError),
            };
            let ch = self.next[dev];
            self.next[dev] = (ch + 1) % 4;
            let counts = 900 * (ch as u16 + 1) + 50 * dev as u16;
            let word = ((ch as u16) << 12) | counts;
            buffer.copy_from_slice(&word.to_be_bytes());
            Ok(())
        }
    }

    impl Write for MockAdcs {
        type Error = BusError;
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockPin {
        edges: u32,
    }

    impl OutputPin for MockPin {
        type Error = Infallible;
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.edges += 1;
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayUs<u32> for NoDelay {
        fn delay_us(&mut self, _us: u32) {}
    }

    fn front_end(next: [u8; 2]) -> AnalogFrontEnd<MockAdcs, MockPin, NoDelay> {
        AnalogFrontEnd::new(
            MockAdcs {
                next,
                writes: Vec::new(),
                fail_reads: false,
            },
            MockPin::default(),
            NoDelay,
        )
    }

    #[test]
    fn raw_word_helpers() {
        // Channel 2, 0xABC counts, alert bit set
        assert_eq!(raw_to_channel_index(0xAA), 2);
        assert_eq!(raw_to_counts(0xAA, 0xBC), 0x0ABC);
        assert_eq!(counts_to_volts(0), 0.0);
        assert!((counts_to_volts(4095) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn init_configures_both_devices() {
        let mut fe = front_end([0, 0]);
        fe.init().unwrap();
        assert_eq!(
            fe.i2c.writes,
            vec![
                (I2C_BUS_ADDRESS_A, vec![0x02, 0xF8]),
                (I2C_BUS_ADDRESS_A, vec![0x00]),
                (I2C_BUS_ADDRESS_B, vec![0x02, 0xF8]),
                (I2C_BUS_ADDRESS_B, vec![0x00]),
            ]
        );
    }

    #[test]
    fn results_are_placed_by_reported_channel() {
        // Device A starts mid-sequence
        let mut fe = front_end([2, 0]);
        let r = fe.acquire().unwrap();
        assert_eq!(fe.convst_pin.edges, 4);

        assert!((r.volts(AnalogInput::AirwayPressure) - counts_to_volts(900)).abs() < 1e-6);
        assert!((r.volts(AnalogInput::SetMaxPressure) - counts_to_volts(3600)).abs() < 1e-6);
        assert!((r.volts(AnalogInput::SetPeep) - counts_to_volts(950)).abs() < 1e-6);
        assert!((r.volts(AnalogInput::SetIeRatio) - counts_to_volts(3650)).abs() < 1e-6);
    }

    #[test]
    fn bus_errors_are_reported() {
        let mut fe = front_end([0, 0]);
        fe.i2c.fail_reads = true;
        assert_eq!(fe.acquire(), Err(AdcError::I2c));
    }
}
