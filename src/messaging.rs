//! Telemetry lines on the serial port.
//!
//! Two comma separated lines per period, each closed by its CRC-16 as a
//! 5 digit zero padded decimal and CRLF:
//!
//! ```text
//! breezy,1,<ts>,<p>,<flow>,<vol>,<peak>,<mean>,<peep>,<rr>,<o2>,<ti>,<i:e>,<mvi>,<mve>,<vti>,<vte>,<crc>
//! service,1,<ts>,<p_o2>,<inspiration>,<crc>
//! ```

use core::fmt::Write;

use spin::Mutex;

use crate::config::SERIAL_ACQUIRE_SPINS;
use crate::crc16::good_crc;
use crate::data_structs::{BreathPhase, RespiratoryStatistics};
use crate::time_util::{timestamp_u16, Duration, Instant, PeriodTimer};

pub const BREATH_TAG: &str = "breezy";
pub const SERVICE_TAG: &str = "service";
pub const PROTOCOL_VERSION: u8 = 1;
pub const BOOT_BANNER: &str = "MCU_RESET\r\n";

// I:E field until one inspiration and one expiration have been timed
pub const IE_UNKNOWN: &str = "-:-";

pub const LINE_CAPACITY: usize = 200;
pub type Line = heapless::String<LINE_CAPACITY>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessagingError {
    /// Line did not fit in `LINE_CAPACITY`.
    Overflow,
    /// Serial channel held by someone else; the line was dropped.
    Busy,
    Write,
}

impl From<core::fmt::Error> for MessagingError {
    fn from(_: core::fmt::Error) -> Self {
        MessagingError::Overflow
    }
}

fn append_crc(line: &mut Line) -> Result<(), MessagingError> {
    let crc = good_crc(line.as_bytes());
    write!(line, "{:05}\r\n", crc)?;
    Ok(())
}

pub fn format_breath_line(ts: u16, s: &RespiratoryStatistics) -> Result<Line, MessagingError> {
    let mut line = Line::new();
    write!(
        line,
        "{},{},{:5},{:5.2},{:5.2},{:5.2},{:5.1},{:2.0},{:2.0},{:2.0},{:3.0},{:5.2},",
        BREATH_TAG,
        PROTOCOL_VERSION,
        ts,
        s.pressure,
        s.flow,
        s.inspired_volume,
        s.peak_pressure,
        s.mean_pressure,
        s.peep,
        s.respiratory_rate,
        s.o2_percent,
        s.ti,
    )?;
    if !(s.ie_ratio.is_finite() && s.ie_ratio > 0.0) {
        write!(line, "{},", IE_UNKNOWN)?;
    } else if s.ie_ratio >= 1.0 {
        write!(line, "{:.1}:1,", s.ie_ratio)?;
    } else {
        write!(line, "1:{:.1},", 1.0 / s.ie_ratio)?;
    }
    write!(
        line,
        "{:4.1},{:4.1},{:3.0},{:3.0},",
        s.minute_volume_inspired,
        s.minute_volume_expired,
        s.tidal_volume_inspired,
        s.tidal_volume_expired,
    )?;
    append_crc(&mut line)?;
    Ok(line)
}

pub fn format_service_line(ts: u16, s: &RespiratoryStatistics) -> Result<Line, MessagingError> {
    let mut line = Line::new();
    let inspiration = (s.phase == BreathPhase::Inspiration) as u8;
    write!(
        line,
        "{},{},{:5},{:5.2},{},",
        SERVICE_TAG, PROTOCOL_VERSION, ts, s.o2_line_pressure, inspiration
    )?;
    append_crc(&mut line)?;
    Ok(line)
}

/// Serial sink shared by every producer of text.  A producer holds it for
/// one line at most.
pub struct SerialChannel<W> {
    writer: Mutex<W>,
    acquire_spins: u32,
}

impl<W: Write> SerialChannel<W> {
    pub fn new(writer: W) -> SerialChannel<W> {
        SerialChannel {
            writer: Mutex::new(writer),
            acquire_spins: SERIAL_ACQUIRE_SPINS,
        }
    }

    pub fn send(&self, line: &str) -> Result<(), MessagingError> {
        for _ in 0..=self.acquire_spins {
            if let Some(mut writer) = self.writer.try_lock() {
                return writer.write_str(line).map_err(|_| MessagingError::Write);
            }
            core::hint::spin_loop();
        }
        Err(MessagingError::Busy)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

pub struct Messaging {
    timer: PeriodTimer,
}

impl Messaging {
    pub fn new(period: Duration, now: Instant) -> Messaging {
        Messaging {
            timer: PeriodTimer::new(period, now),
        }
    }

    /// Sends the breath and service lines if a period has elapsed.  Returns
    /// whether it was due.  A busy channel drops the line.
    pub fn poll<W: Write>(
        &mut self,
        now: Instant,
        stats: &RespiratoryStatistics,
        channel: &SerialChannel<W>,
    ) -> Result<bool, MessagingError> {
        if !self.timer.poll(now) {
            return Ok(false);
        }
        let ts = timestamp_u16(now);
        channel.send(&format_breath_line(ts, stats)?)?;
        channel.send(&format_service_line(ts, stats)?)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::instant_from_millis;
    use std::string::String;

    fn stats() -> RespiratoryStatistics {
        RespiratoryStatistics {
            pressure: 12.5,
            flow: -3.25,
            o2_line_pressure: 200.0,
            o2_percent: 40.0,
            inspired_volume: 250.0,
            peak_pressure: 28.0,
            mean_pressure: 14.0,
            peep: 5.0,
            respiratory_rate: 15.0,
            ti: 1.25,
            te: 2.5,
            ie_ratio: 0.5,
            minute_volume_inspired: 7.5,
            minute_volume_expired: 7.0,
            tidal_volume_inspired: 500.0,
            tidal_volume_expired: 480.0,
            phase: BreathPhase::Inspiration,
        }
    }

    #[test]
    fn breath_line_fields_and_crc() {
        let line = format_breath_line(1234, &stats()).unwrap();
        assert_eq!(
            line.as_str(),
            "breezy,1, 1234,12.50,-3.25,250.00, 28.0,14, 5,15, 40, 1.25,1:2.0, 7.5, 7.0,500,480,57813\r\n"
        );
    }

    #[test]
    fn service_line_crc_is_zero_padded() {
        let line = format_service_line(1234, &stats()).unwrap();
        assert_eq!(line.as_str(), "service,1, 1234,200.00,1,03349\r\n");

        let mut s = stats();
        s.phase = BreathPhase::Expiration;
        assert!(format_service_line(7, &s).unwrap().starts_with("service,1,    7,200.00,0,"));
    }

    #[test]
    fn ie_ratio_is_written_as_x_to_one_or_one_to_x() {
        let field = |ie: f32| {
            let mut s = stats();
            s.ie_ratio = ie;
            let line = format_breath_line(0, &s).unwrap();
            String::from(line.split(',').nth(12).unwrap())
        };
        assert_eq!(field(1.0), "1.0:1");
        assert_eq!(field(1.5), "1.5:1");
        assert_eq!(field(0.5), "1:2.0");
        assert_eq!(field(0.33), "1:3.0");
    }

    #[test]
    fn ie_ratio_is_a_placeholder_before_the_first_breath() {
        let line = format_breath_line(0, &RespiratoryStatistics::ZERO).unwrap();
        assert_eq!(line.split(',').nth(12), Some(IE_UNKNOWN));
        assert!(!line.contains("inf"));
    }

    #[test]
    fn line_crc_covers_everything_before_it() {
        let line = format_breath_line(42, &stats()).unwrap();
        let body = line.strip_suffix("\r\n").unwrap();
        let (payload, crc) = body.split_at(body.len() - 5);
        assert_eq!(crc.parse::<u16>().unwrap(), good_crc(payload.as_bytes()));
    }

    #[test]
    fn poll_sends_both_lines_once_per_period() {
        let channel = SerialChannel::new(String::new());
        let mut m = Messaging::new(Duration::millis(50), instant_from_millis(0));

        assert_eq!(m.poll(instant_from_millis(20), &stats(), &channel), Ok(false));
        assert_eq!(m.poll(instant_from_millis(50), &stats(), &channel), Ok(true));
        assert_eq!(m.poll(instant_from_millis(60), &stats(), &channel), Ok(false));

        let out = channel.into_inner();
        let lines: std::vec::Vec<&str> = out.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("breezy,1,   50,"));
        assert!(lines[1].starts_with("service,1,   50,"));
    }

    #[test]
    fn busy_channel_drops_the_line() {
        let channel = SerialChannel::new(String::new());
        {
            let _held = channel.writer.lock();
            assert_eq!(channel.send("MCU_RESET\r\n"), Err(MessagingError::Busy));
        }
        channel.send(BOOT_BANNER).unwrap();
        assert_eq!(channel.into_inner(), "MCU_RESET\r\n");
    }
}
