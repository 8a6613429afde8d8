// CRC-CCITT "good CRC" used to frame the telemetry lines:
// polynomial 0x1021, initial value 0xFFFF, MSB first, message augmented
// with 16 zero bits.  "123456789" gives 0xE5CC.

const POLY: u16 = 0x1021;
pub const INITIAL: u16 = 0xFFFF;

#[derive(Debug, Copy, Clone)]
pub struct Crc16 {
    crc: u16,
}

impl Crc16 {
    pub fn new() -> Crc16 {
        Crc16 { crc: INITIAL }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.update_byte(b);
        }
    }

    fn update_byte(&mut self, ch: u8) {
        let mut v: u8 = 0x80;
        for _ in 0..8 {
            let xor_flag = self.crc & 0x8000 != 0;
            self.crc <<= 1;
            // Shift the next message bit into the register
            if ch & v != 0 {
                self.crc += 1;
            }
            if xor_flag {
                self.crc ^= POLY;
            }
            v >>= 1;
        }
    }

    /// Pushes the 16 augmentation zero bits through and returns the CRC.
    pub fn finish(mut self) -> u16 {
        for _ in 0..16 {
            let xor_flag = self.crc & 0x8000 != 0;
            self.crc <<= 1;
            if xor_flag {
                self.crc ^= POLY;
            }
        }
        self.crc
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

pub fn good_crc(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.finish()
}
