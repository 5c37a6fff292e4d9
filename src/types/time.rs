//! Binary time tags: CP56Time2a and CP24Time2a.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

/// Seven-octet time tag (milliseconds to years).
///
/// ```text
/// octet 1-2  milliseconds 0..59999 (little-endian)
/// octet 3    IV | res | minutes 0..59
/// octet 4    SU | res | hours 0..23
/// octet 5    day of week 1..7 (3 bits) | day of month 1..31
/// octet 6    month 1..12
/// octet 7    year 0..99
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp56Time2a {
    pub milliseconds: u16,
    pub minutes: u8,
    pub hours: u8,
    pub day: u8,
    /// 1 = Monday, 0 when unused.
    pub day_of_week: u8,
    pub month: u8,
    /// Years since 2000.
    pub year: u8,
    pub invalid: bool,
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Decode from 7 octets.
    pub fn from_bytes(bytes: [u8; 7]) -> Self {
        Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: bytes[2] & 0x80 != 0,
            hours: bytes[3] & 0x1F,
            summer_time: bytes[3] & 0x80 != 0,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
        }
    }

    /// Encode to 7 octets.
    pub fn to_bytes(&self) -> [u8; 7] {
        let [ms_lo, ms_hi] = self.milliseconds.to_le_bytes();
        [
            ms_lo,
            ms_hi,
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }

    /// Build from a UTC timestamp. Years outside 2000..=2099 wrap modulo 100.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let millis = (dt.second() * 1000 + dt.timestamp_subsec_millis()).min(59_999);
        Self {
            milliseconds: millis as u16,
            minutes: dt.minute() as u8,
            hours: dt.hour() as u8,
            day: dt.day() as u8,
            day_of_week: dt.weekday().number_from_monday() as u8,
            month: dt.month() as u8,
            year: dt.year().rem_euclid(100) as u8,
            invalid: false,
            summer_time: false,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Interpret as a UTC timestamp in 2000..=2099. `None` if the fields do
    /// not form a calendar date.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let naive = NaiveDate::from_ymd_opt(
            2000 + self.year as i32,
            self.month as u32,
            self.day as u32,
        )?
        .and_hms_milli_opt(
            self.hours as u32,
            self.minutes as u32,
            (self.milliseconds / 1000) as u32,
            (self.milliseconds % 1000) as u32,
        )?;
        Some(Utc.from_utc_datetime(&naive))
    }
}

impl std::fmt::Display for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year,
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.milliseconds / 1000,
            self.milliseconds % 1000
        )?;
        if self.invalid {
            f.write_str(" IV")?;
        }
        Ok(())
    }
}

/// Three-octet time tag (milliseconds and minutes only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp24Time2a {
    pub milliseconds: u16,
    pub minutes: u8,
    pub invalid: bool,
}

impl Cp24Time2a {
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: bytes[2] & 0x80 != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        let [ms_lo, ms_hi] = self.milliseconds.to_le_bytes();
        [
            ms_lo,
            ms_hi,
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
        ]
    }
}

impl From<Cp56Time2a> for Cp24Time2a {
    fn from(t: Cp56Time2a) -> Self {
        Self {
            milliseconds: t.milliseconds,
            minutes: t.minutes,
            invalid: t.invalid,
        }
    }
}

/// Time tag attached to an information object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTag {
    Cp24(Cp24Time2a),
    Cp56(Cp56Time2a),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp56_wire_layout() {
        let t = Cp56Time2a {
            milliseconds: 59_999,
            minutes: 59,
            hours: 23,
            day: 31,
            day_of_week: 7,
            month: 12,
            year: 99,
            invalid: true,
            summer_time: true,
        };
        let bytes = t.to_bytes();
        assert_eq!(bytes, [0x5F, 0xEA, 0xBB, 0x97, 0xFF, 0x0C, 0x63]);
        assert_eq!(Cp56Time2a::from_bytes(bytes), t);
    }

    #[test]
    fn test_cp56_reserved_bits_ignored() {
        let t = Cp56Time2a::from_bytes([0, 0, 0x40, 0x60, 0x01, 0xF1, 0x80]);
        assert_eq!(t.minutes, 0);
        assert_eq!(t.hours, 0);
        assert_eq!(t.month, 1);
        assert_eq!(t.year, 0);
        assert!(!t.invalid);
    }

    #[test]
    fn test_cp56_chrono_conversion() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 45).unwrap()
            + chrono::Duration::milliseconds(123);
        let t = Cp56Time2a::from_datetime(dt);
        assert_eq!(t.year, 24);
        assert_eq!(t.month, 3);
        assert_eq!(t.day, 15);
        // 2024-03-15 is a Friday
        assert_eq!(t.day_of_week, 5);
        assert_eq!(t.milliseconds, 45_123);
        assert_eq!(t.to_datetime(), Some(dt));
        assert_eq!(t.to_string(), "2024-03-15 10:30:45.123");
    }

    #[test]
    fn test_cp56_invalid_calendar() {
        let t = Cp56Time2a {
            month: 2,
            day: 30,
            ..Default::default()
        };
        assert_eq!(t.to_datetime(), None);
    }

    #[test]
    fn test_cp24_from_cp56() {
        let t56 = Cp56Time2a {
            milliseconds: 1234,
            minutes: 7,
            hours: 5,
            ..Default::default()
        };
        let t24 = Cp24Time2a::from(t56);
        assert_eq!(t24.to_bytes(), [0xD2, 0x04, 0x07]);
        assert_eq!(Cp24Time2a::from_bytes(t24.to_bytes()), t24);
    }
}
