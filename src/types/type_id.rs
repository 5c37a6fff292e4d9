//! Type identification.
//!
//! The type identifier fixes the layout of every information object in an
//! ASDU: which value kind it carries, its size on the wire and whether a
//! time tag follows it.

use crate::error::{Iec104Error, Result};

/// Time tag appended to an information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTagKind {
    None,
    /// CP24Time2a, 3 octets.
    Cp24,
    /// CP56Time2a, 7 octets.
    Cp56,
}

impl TimeTagKind {
    /// Encoded size in octets.
    #[inline]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Cp24 => 3,
            Self::Cp56 => 7,
        }
    }
}

macro_rules! type_ids {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal, $name:literal, $size:literal, $tag:ident; )+) => {
        /// Supported type identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum TypeId {
            $( $(#[$doc])* $variant = $code, )+
        }

        impl TypeId {
            /// Decode a type identification octet.
            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $( $code => Ok(Self::$variant), )+
                    other => Err(Iec104Error::UnknownTypeId(other)),
                }
            }

            /// IEC mnemonic, e.g. `M_SP_NA_1`.
            pub const fn standard_name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }

            /// Size of the information element without time tag.
            pub const fn element_len(&self) -> usize {
                match self {
                    $( Self::$variant => $size, )+
                }
            }

            /// Time tag following the element.
            pub const fn time_tag(&self) -> TimeTagKind {
                match self {
                    $( Self::$variant => TimeTagKind::$tag, )+
                }
            }
        }
    };
}

type_ids! {
    /// Single-point information
    SinglePoint = 1, "M_SP_NA_1", 1, None;
    SinglePointTime24 = 2, "M_SP_TA_1", 1, Cp24;
    /// Double-point information
    DoublePoint = 3, "M_DP_NA_1", 1, None;
    DoublePointTime24 = 4, "M_DP_TA_1", 1, Cp24;
    /// Step position information (VTI + QDS)
    StepPosition = 5, "M_ST_NA_1", 2, None;
    StepPositionTime24 = 6, "M_ST_TA_1", 2, Cp24;
    /// Bitstring of 32 bit (BSI + QDS)
    Bitstring32 = 7, "M_BO_NA_1", 5, None;
    Bitstring32Time24 = 8, "M_BO_TA_1", 5, Cp24;
    /// Measured value, normalized (NVA + QDS)
    MeasuredNormalized = 9, "M_ME_NA_1", 3, None;
    MeasuredNormalizedTime24 = 10, "M_ME_TA_1", 3, Cp24;
    /// Measured value, scaled (SVA + QDS)
    MeasuredScaled = 11, "M_ME_NB_1", 3, None;
    MeasuredScaledTime24 = 12, "M_ME_TB_1", 3, Cp24;
    /// Measured value, short floating point (IEEE 754 + QDS)
    MeasuredFloat = 13, "M_ME_NC_1", 5, None;
    MeasuredFloatTime24 = 14, "M_ME_TC_1", 5, Cp24;
    /// Integrated totals (BCR)
    IntegratedTotals = 15, "M_IT_NA_1", 5, None;
    IntegratedTotalsTime24 = 16, "M_IT_TA_1", 5, Cp24;
    /// Packed single-point information with status change detection (SCD + QDS)
    PackedSinglePoint = 20, "M_PS_NA_1", 5, None;
    /// Measured value, normalized without quality descriptor
    MeasuredNormalizedNoQuality = 21, "M_ME_ND_1", 2, None;
    SinglePointTime56 = 30, "M_SP_TB_1", 1, Cp56;
    DoublePointTime56 = 31, "M_DP_TB_1", 1, Cp56;
    StepPositionTime56 = 32, "M_ST_TB_1", 2, Cp56;
    Bitstring32Time56 = 33, "M_BO_TB_1", 5, Cp56;
    MeasuredNormalizedTime56 = 34, "M_ME_TD_1", 3, Cp56;
    MeasuredScaledTime56 = 35, "M_ME_TE_1", 3, Cp56;
    MeasuredFloatTime56 = 36, "M_ME_TF_1", 5, Cp56;
    IntegratedTotalsTime56 = 37, "M_IT_TB_1", 5, Cp56;

    /// Single command (SCO)
    SingleCommand = 45, "C_SC_NA_1", 1, None;
    /// Double command (DCO)
    DoubleCommand = 46, "C_DC_NA_1", 1, None;
    /// Regulating step command (RCO)
    RegulatingStepCommand = 47, "C_RC_NA_1", 1, None;
    /// Set-point command, normalized (NVA + QOS)
    SetpointNormalized = 48, "C_SE_NA_1", 3, None;
    /// Set-point command, scaled (SVA + QOS)
    SetpointScaled = 49, "C_SE_NB_1", 3, None;
    /// Set-point command, short floating point (IEEE 754 + QOS)
    SetpointFloat = 50, "C_SE_NC_1", 5, None;
    /// Bitstring of 32 bit command (BSI)
    Bitstring32Command = 51, "C_BO_NA_1", 4, None;
    SingleCommandTime56 = 58, "C_SC_TA_1", 1, Cp56;
    DoubleCommandTime56 = 59, "C_DC_TA_1", 1, Cp56;
    RegulatingStepCommandTime56 = 60, "C_RC_TA_1", 1, Cp56;
    SetpointNormalizedTime56 = 61, "C_SE_TA_1", 3, Cp56;
    SetpointScaledTime56 = 62, "C_SE_TB_1", 3, Cp56;
    SetpointFloatTime56 = 63, "C_SE_TC_1", 5, Cp56;
    Bitstring32CommandTime56 = 64, "C_BO_TA_1", 4, Cp56;

    /// End of initialization (COI)
    EndOfInitialization = 70, "M_EI_NA_1", 1, None;

    /// Interrogation command (QOI)
    InterrogationCommand = 100, "C_IC_NA_1", 1, None;
    /// Counter interrogation command (QCC)
    CounterInterrogationCommand = 101, "C_CI_NA_1", 1, None;
    /// Read command, no element
    ReadCommand = 102, "C_RD_NA_1", 0, None;
    /// Clock synchronization command (CP56Time2a)
    ClockSyncCommand = 103, "C_CS_NA_1", 7, None;
    /// Test command (fixed test bit pattern)
    TestCommand = 104, "C_TS_NA_1", 2, None;
    /// Reset process command (QRP)
    ResetProcessCommand = 105, "C_RP_NA_1", 1, None;
    /// Delay acquisition command (CP16Time2a)
    DelayAcquisitionCommand = 106, "C_CD_NA_1", 2, None;
    /// Test command with time tag (TSC + CP56Time2a)
    TestCommandTime56 = 107, "C_TS_TA_1", 2, Cp56;
}

impl TypeId {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Size of one information object body (element plus time tag), IOA excluded.
    #[inline]
    pub const fn object_len(&self) -> usize {
        self.element_len() + self.time_tag().encoded_len()
    }

    /// Process information in monitor direction.
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.as_u8(), 1..=44)
    }

    /// Process command (select/execute capable).
    #[inline]
    pub const fn is_process_command(&self) -> bool {
        matches!(self.as_u8(), 45..=69)
    }

    /// System command in control direction.
    #[inline]
    pub const fn is_system_command(&self) -> bool {
        matches!(self.as_u8(), 100..=109)
    }

    /// Whether the object carries a time tag.
    #[inline]
    pub const fn has_time_tag(&self) -> bool {
        !matches!(self.time_tag(), TimeTagKind::None)
    }

    /// The counterpart of a command type without time tag.
    pub const fn without_time_tag(&self) -> Self {
        match self {
            Self::SingleCommandTime56 => Self::SingleCommand,
            Self::DoubleCommandTime56 => Self::DoubleCommand,
            Self::RegulatingStepCommandTime56 => Self::RegulatingStepCommand,
            Self::SetpointNormalizedTime56 => Self::SetpointNormalized,
            Self::SetpointScaledTime56 => Self::SetpointScaled,
            Self::SetpointFloatTime56 => Self::SetpointFloat,
            Self::Bitstring32CommandTime56 => Self::Bitstring32Command,
            other => *other,
        }
    }

    /// The CP56 time-tagged variant of a command type.
    pub const fn with_time_tag(&self) -> Option<Self> {
        match self {
            Self::SingleCommand => Some(Self::SingleCommandTime56),
            Self::DoubleCommand => Some(Self::DoubleCommandTime56),
            Self::RegulatingStepCommand => Some(Self::RegulatingStepCommandTime56),
            Self::SetpointNormalized => Some(Self::SetpointNormalizedTime56),
            Self::SetpointScaled => Some(Self::SetpointScaledTime56),
            Self::SetpointFloat => Some(Self::SetpointFloatTime56),
            Self::Bitstring32Command => Some(Self::Bitstring32CommandTime56),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.standard_name(), self.as_u8())
    }
}
