//! Application view of monitored information.
//!
//! [`DataPoint`] flattens the per-type element layouts into one value enum
//! and one packed quality byte, which is what most consumers store.

use super::{DoublePointValue, MeasuredQuality, QualityDescriptor, TimeTag};

/// One monitored value as delivered to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Information object address (IOA)
    pub ioa: u32,
    pub value: DataValue,
    pub quality: Quality,
    pub timestamp: Option<TimeTag>,
}

impl DataPoint {
    #[inline]
    pub const fn new(ioa: u32, value: DataValue) -> Self {
        Self {
            ioa,
            value,
            quality: Quality::GOOD,
            timestamp: None,
        }
    }

    #[inline]
    pub const fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    #[inline]
    pub const fn with_timestamp(mut self, timestamp: Option<TimeTag>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub const fn is_good(&self) -> bool {
        self.quality.is_good()
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }
}

/// Data value variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataValue {
    Single(bool),
    Double(DoublePointValue),
    /// Normalized value as a fraction in -1.0..1.0.
    Normalized(f32),
    Scaled(i16),
    Float(f32),
    Bitstring(u32),
    StepPosition { value: i8, transient: bool },
    Counter { value: i32, sequence: u8, carry: bool, adjusted: bool },
    /// Sixteen packed single points with change detection.
    PackedSingle { status: u16, changed: u16 },
}

impl DataValue {
    /// Numeric view of the value; booleans and double points map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Single(v) => Some(if v { 1.0 } else { 0.0 }),
            Self::Double(DoublePointValue::Off) => Some(0.0),
            Self::Double(DoublePointValue::On) => Some(1.0),
            Self::Double(_) => None,
            Self::Normalized(v) | Self::Float(v) => Some(v as f64),
            Self::Scaled(v) => Some(v as f64),
            Self::Bitstring(v) => Some(v as f64),
            Self::StepPosition { value, .. } => Some(value as f64),
            Self::Counter { value, .. } => Some(value as f64),
            Self::PackedSingle { status, .. } => Some(status as f64),
        }
    }

    /// Boolean view of status values.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Single(v) => Some(*v),
            Self::Double(DoublePointValue::On) => Some(true),
            Self::Double(DoublePointValue::Off) => Some(false),
            _ => None,
        }
    }
}

/// Packed quality flags.
///
/// - Bit 0: overflow (OV)
/// - Bit 1: blocked (BL)
/// - Bit 2: substituted (SB)
/// - Bit 3: not topical (NT)
/// - Bit 4: invalid (IV)
/// - Bit 5: counter carry (CY)
/// - Bit 6: counter adjusted (CA)
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Quality(u8);

impl Quality {
    pub const GOOD: Self = Self(0);
    pub const OVERFLOW: Self = Self(0x01);
    pub const BLOCKED: Self = Self(0x02);
    pub const SUBSTITUTED: Self = Self(0x04);
    pub const NOT_TOPICAL: Self = Self(0x08);
    pub const INVALID: Self = Self(0x10);
    pub const CARRY: Self = Self(0x20);
    pub const ADJUSTED: Self = Self(0x40);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::OVERFLOW, "OV"),
        (Self::BLOCKED, "BL"),
        (Self::SUBSTITUTED, "SB"),
        (Self::NOT_TOPICAL, "NT"),
        (Self::INVALID, "IV"),
        (Self::CARRY, "CY"),
        (Self::ADJUSTED, "CA"),
    ];

    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn set(self, flag: Self, on: bool) -> Self {
        if on {
            Self(self.0 | flag.0)
        } else {
            Self(self.0 & !flag.0)
        }
    }

    /// Good means none of OV, BL, SB, NT, IV; counter flags do not count.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0x1F == 0
    }

    #[inline]
    pub const fn invalid(&self) -> bool {
        self.contains(Self::INVALID)
    }

    #[inline]
    pub const fn as_raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw & 0x7F)
    }

    pub const fn from_descriptor(qd: QualityDescriptor) -> Self {
        Self::GOOD
            .set(Self::BLOCKED, qd.blocked)
            .set(Self::SUBSTITUTED, qd.substituted)
            .set(Self::NOT_TOPICAL, qd.not_topical)
            .set(Self::INVALID, qd.invalid)
    }

    pub const fn from_measured(mq: MeasuredQuality) -> Self {
        Self::GOOD
            .set(Self::OVERFLOW, mq.overflow)
            .set(Self::BLOCKED, mq.blocked)
            .set(Self::SUBSTITUTED, mq.substituted)
            .set(Self::NOT_TOPICAL, mq.not_topical)
            .set(Self::INVALID, mq.invalid)
    }
}

impl std::fmt::Debug for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Quality({self})")
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return f.write_str("Good");
        }
        let mut sep = "";
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                write!(f, "{sep}{name}")?;
                sep = "|";
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_flags() {
        let q = Quality::GOOD.union(Quality::BLOCKED).union(Quality::INVALID);
        assert!(q.contains(Quality::BLOCKED));
        assert!(q.invalid());
        assert!(!q.contains(Quality::OVERFLOW));
        assert!(!q.is_good());
        assert_eq!(q.set(Quality::INVALID, false), Quality::BLOCKED);
        assert_eq!(q.to_string(), "BL|IV");
        assert_eq!(Quality::GOOD.to_string(), "Good");
        assert_eq!(Quality::from_raw(0xFF).as_raw(), 0x7F);
    }

    #[test]
    fn test_counter_flags_do_not_degrade_quality() {
        let q = Quality::CARRY.union(Quality::ADJUSTED);
        assert!(q.is_good());
        assert_eq!(format!("{q:?}"), "Quality(CY|CA)");
    }

    #[test]
    fn test_from_descriptors() {
        let qd = QualityDescriptor {
            not_topical: true,
            substituted: true,
            ..Default::default()
        };
        assert_eq!(
            Quality::from_descriptor(qd),
            Quality::NOT_TOPICAL.union(Quality::SUBSTITUTED)
        );
        let mq = MeasuredQuality::from_u8(0x01);
        assert_eq!(Quality::from_measured(mq), Quality::OVERFLOW);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(DataValue::Single(true).as_f64(), Some(1.0));
        assert_eq!(DataValue::Double(DoublePointValue::Indeterminate).as_f64(), None);
        assert_eq!(DataValue::Double(DoublePointValue::On).as_bool(), Some(true));
        assert_eq!(DataValue::Scaled(-5).as_f64(), Some(-5.0));
        assert_eq!(DataValue::Float(1.5).as_bool(), None);
        let p = DataPoint::new(10, DataValue::Float(2.0)).with_quality(Quality::INVALID);
        assert!(!p.is_good());
        assert_eq!(p.as_f64(), Some(2.0));
    }
}
