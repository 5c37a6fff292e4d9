//! Cause of transmission (COT).
//!
//! Only the low six bits of the COT octet carry the cause. The test (T) and
//! negative (P/N) flags live in [`AsduHeader`](crate::types::AsduHeader).

use crate::error::{Iec104Error, Result};

/// Cause of transmission code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cot {
    Periodic = 1,
    Background = 2,
    Spontaneous = 3,
    Initialized = 4,
    Request = 5,
    Activation = 6,
    ActivationConfirm = 7,
    Deactivation = 8,
    DeactivationConfirm = 9,
    ActivationTermination = 10,
    ReturnRemoteCommand = 11,
    ReturnLocalCommand = 12,
    FileTransfer = 13,
    InterrogatedByStation = 20,
    InterrogatedByGroup1 = 21,
    InterrogatedByGroup2 = 22,
    InterrogatedByGroup3 = 23,
    InterrogatedByGroup4 = 24,
    InterrogatedByGroup5 = 25,
    InterrogatedByGroup6 = 26,
    InterrogatedByGroup7 = 27,
    InterrogatedByGroup8 = 28,
    InterrogatedByGroup9 = 29,
    InterrogatedByGroup10 = 30,
    InterrogatedByGroup11 = 31,
    InterrogatedByGroup12 = 32,
    InterrogatedByGroup13 = 33,
    InterrogatedByGroup14 = 34,
    InterrogatedByGroup15 = 35,
    InterrogatedByGroup16 = 36,
    RequestedByGeneralCounter = 37,
    RequestedByGroup1Counter = 38,
    RequestedByGroup2Counter = 39,
    RequestedByGroup3Counter = 40,
    RequestedByGroup4Counter = 41,
    UnknownTypeId = 44,
    UnknownCot = 45,
    UnknownCommonAddress = 46,
    UnknownIoa = 47,
}

const INTERROGATION_GROUPS: [Cot; 16] = [
    Cot::InterrogatedByGroup1,
    Cot::InterrogatedByGroup2,
    Cot::InterrogatedByGroup3,
    Cot::InterrogatedByGroup4,
    Cot::InterrogatedByGroup5,
    Cot::InterrogatedByGroup6,
    Cot::InterrogatedByGroup7,
    Cot::InterrogatedByGroup8,
    Cot::InterrogatedByGroup9,
    Cot::InterrogatedByGroup10,
    Cot::InterrogatedByGroup11,
    Cot::InterrogatedByGroup12,
    Cot::InterrogatedByGroup13,
    Cot::InterrogatedByGroup14,
    Cot::InterrogatedByGroup15,
    Cot::InterrogatedByGroup16,
];

const COUNTER_GROUPS: [Cot; 4] = [
    Cot::RequestedByGroup1Counter,
    Cot::RequestedByGroup2Counter,
    Cot::RequestedByGroup3Counter,
    Cot::RequestedByGroup4Counter,
];

impl Cot {
    /// Decode the cause from a COT octet; the T and P/N bits are ignored.
    pub fn from_u8(value: u8) -> Result<Self> {
        let cause = value & 0x3F;
        let cot = match cause {
            1 => Self::Periodic,
            2 => Self::Background,
            3 => Self::Spontaneous,
            4 => Self::Initialized,
            5 => Self::Request,
            6 => Self::Activation,
            7 => Self::ActivationConfirm,
            8 => Self::Deactivation,
            9 => Self::DeactivationConfirm,
            10 => Self::ActivationTermination,
            11 => Self::ReturnRemoteCommand,
            12 => Self::ReturnLocalCommand,
            13 => Self::FileTransfer,
            20 => Self::InterrogatedByStation,
            21..=36 => INTERROGATION_GROUPS[(cause - 21) as usize],
            37 => Self::RequestedByGeneralCounter,
            38..=41 => COUNTER_GROUPS[(cause - 38) as usize],
            44 => Self::UnknownTypeId,
            45 => Self::UnknownCot,
            46 => Self::UnknownCommonAddress,
            47 => Self::UnknownIoa,
            _ => return Err(Iec104Error::UnknownCot(cause)),
        };
        Ok(cot)
    }

    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Cause used for data answering an interrogation for `group`
    /// (0 = station, 1..=16 = group).
    pub fn interrogated_by(group: u8) -> Option<Self> {
        match group {
            0 => Some(Self::InterrogatedByStation),
            1..=16 => Some(INTERROGATION_GROUPS[(group - 1) as usize]),
            _ => None,
        }
    }

    /// Cause used for counters answering a counter request for `group`
    /// (0 = general, 1..=4 = group).
    pub fn counter_requested_by(group: u8) -> Option<Self> {
        match group {
            0 => Some(Self::RequestedByGeneralCounter),
            1..=4 => Some(COUNTER_GROUPS[(group - 1) as usize]),
            _ => None,
        }
    }

    /// Causes a controlled station uses to reject an ASDU it cannot map.
    #[inline]
    pub const fn is_unknown_reply(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Confirmation causes a controlling station waits for.
    #[inline]
    pub const fn is_confirmation(&self) -> bool {
        matches!(self, Self::ActivationConfirm | Self::DeactivationConfirm) || self.is_unknown_reply()
    }

    /// Check if this COT indicates an interrogation response.
    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }

    /// Check if this COT indicates a counter request response.
    #[inline]
    pub const fn is_counter_response(&self) -> bool {
        matches!(self.as_u8(), 37..=41)
    }

    /// Standard mnemonic, as used in protocol traces.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Self::Periodic => "per/cyc",
            Self::Background => "back",
            Self::Spontaneous => "spont",
            Self::Initialized => "init",
            Self::Request => "req",
            Self::Activation => "act",
            Self::ActivationConfirm => "actcon",
            Self::Deactivation => "deact",
            Self::DeactivationConfirm => "deactcon",
            Self::ActivationTermination => "actterm",
            Self::ReturnRemoteCommand => "retrem",
            Self::ReturnLocalCommand => "retloc",
            Self::FileTransfer => "file",
            Self::InterrogatedByStation => "inrogen",
            Self::InterrogatedByGroup1
            | Self::InterrogatedByGroup2
            | Self::InterrogatedByGroup3
            | Self::InterrogatedByGroup4
            | Self::InterrogatedByGroup5
            | Self::InterrogatedByGroup6
            | Self::InterrogatedByGroup7
            | Self::InterrogatedByGroup8
            | Self::InterrogatedByGroup9
            | Self::InterrogatedByGroup10
            | Self::InterrogatedByGroup11
            | Self::InterrogatedByGroup12
            | Self::InterrogatedByGroup13
            | Self::InterrogatedByGroup14
            | Self::InterrogatedByGroup15
            | Self::InterrogatedByGroup16 => "inro",
            Self::RequestedByGeneralCounter => "reqcogen",
            Self::RequestedByGroup1Counter
            | Self::RequestedByGroup2Counter
            | Self::RequestedByGroup3Counter
            | Self::RequestedByGroup4Counter => "reqco",
            Self::UnknownTypeId => "unknown type",
            Self::UnknownCot => "unknown cause",
            Self::UnknownCommonAddress => "unknown common address",
            Self::UnknownIoa => "unknown ioa",
        }
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_u8() {
            n @ 21..=36 => write!(f, "inro{}", n - 20),
            n @ 38..=41 => write!(f, "reqco{}", n - 37),
            _ => f.write_str(self.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_defined_codes_roundtrip() {
        let defined = (1..=13).chain(20..=41).chain(44..=47);
        for val in defined {
            let cot = Cot::from_u8(val).unwrap();
            assert_eq!(cot.as_u8(), val, "roundtrip failed for {val}");
        }
    }

    #[test]
    fn test_undefined_codes_are_unknown_cot() {
        for val in [0u8, 14, 19, 42, 43, 48, 63] {
            match Cot::from_u8(val) {
                Err(Iec104Error::UnknownCot(v)) => assert_eq!(v, val),
                other => panic!("expected UnknownCot for {val}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_flag_bits_ignored() {
        // test + negative bits set around "actcon"
        assert_eq!(Cot::from_u8(0xC7).unwrap(), Cot::ActivationConfirm);
    }

    #[test]
    fn test_group_mapping() {
        assert_eq!(Cot::interrogated_by(0), Some(Cot::InterrogatedByStation));
        assert_eq!(Cot::interrogated_by(16), Some(Cot::InterrogatedByGroup16));
        assert_eq!(Cot::interrogated_by(17), None);
        assert_eq!(
            Cot::counter_requested_by(0),
            Some(Cot::RequestedByGeneralCounter)
        );
        assert_eq!(
            Cot::counter_requested_by(3),
            Some(Cot::RequestedByGroup3Counter)
        );
        assert_eq!(Cot::counter_requested_by(5), None);
    }

    #[test]
    fn test_classification() {
        assert!(Cot::InterrogatedByGroup7.is_interrogation_response());
        assert!(!Cot::Spontaneous.is_interrogation_response());
        assert!(Cot::RequestedByGroup4Counter.is_counter_response());
        assert!(Cot::UnknownIoa.is_unknown_reply());
        assert!(Cot::UnknownIoa.is_confirmation());
        assert!(Cot::DeactivationConfirm.is_confirmation());
        assert!(!Cot::ActivationTermination.is_confirmation());
    }

    #[test]
    fn test_display() {
        assert_eq!(Cot::Activation.to_string(), "act");
        assert_eq!(Cot::InterrogatedByGroup2.to_string(), "inro2");
        assert_eq!(Cot::RequestedByGroup1Counter.to_string(), "reqco1");
    }
}
