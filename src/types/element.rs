//! Information element value kinds.
//!
//! Each type here owns its own bit layout. Fixed-size kinds convert from and
//! to plain octet arrays; the object codec guarantees the length beforehand.

const IV: u8 = 0x80;
const NT: u8 = 0x40;
const SB: u8 = 0x20;
const BL: u8 = 0x10;
const OV: u8 = 0x01;
const SE: u8 = 0x80;

/// Fixed bit pattern carried by the test command (C_TS_NA_1).
pub const TEST_PATTERN: u16 = 0x55AA;

/// Quality bits shared by SIQ and DIQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityDescriptor {
    /// Blocked (BL)
    pub blocked: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Invalid (IV)
    pub invalid: bool,
}

impl QualityDescriptor {
    /// Create a quality descriptor indicating invalid data.
    pub fn invalid() -> Self {
        Self {
            invalid: true,
            ..Default::default()
        }
    }

    /// Extract the quality bits of a SIQ or DIQ octet.
    pub fn from_bits(value: u8) -> Self {
        Self {
            blocked: value & BL != 0,
            substituted: value & SB != 0,
            not_topical: value & NT != 0,
            invalid: value & IV != 0,
        }
    }

    /// Quality bits positioned for a SIQ or DIQ octet.
    pub fn bits(&self) -> u8 {
        flag(self.blocked, BL) | flag(self.substituted, SB) | flag(self.not_topical, NT) | flag(self.invalid, IV)
    }

    /// Check if the quality is good (all flags false).
    pub fn is_good(&self) -> bool {
        self.bits() == 0
    }
}

/// Quality descriptor for measured values (QDS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasuredQuality {
    /// Overflow (OV)
    pub overflow: bool,
    /// Blocked (BL)
    pub blocked: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Invalid (IV)
    pub invalid: bool,
}

impl MeasuredQuality {
    pub fn from_u8(value: u8) -> Self {
        Self {
            overflow: value & OV != 0,
            blocked: value & BL != 0,
            substituted: value & SB != 0,
            not_topical: value & NT != 0,
            invalid: value & IV != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        flag(self.overflow, OV)
            | flag(self.blocked, BL)
            | flag(self.substituted, SB)
            | flag(self.not_topical, NT)
            | flag(self.invalid, IV)
    }

    /// Check if the quality is good (all flags false).
    pub fn is_good(&self) -> bool {
        self.as_u8() == 0
    }
}

#[inline]
const fn flag(set: bool, mask: u8) -> u8 {
    if set {
        mask
    } else {
        0
    }
}

/// Single-point information with quality (SIQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinglePoint {
    pub value: bool,
    pub quality: QualityDescriptor,
}

impl SinglePoint {
    pub fn new(value: bool) -> Self {
        Self {
            value,
            quality: QualityDescriptor::default(),
        }
    }

    pub fn from_u8(value: u8) -> Self {
        Self {
            value: value & 0x01 != 0,
            quality: QualityDescriptor::from_bits(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        flag(self.value, 0x01) | self.quality.bits()
    }
}

/// Double-point state (DPI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoublePointValue {
    /// Indeterminate or intermediate state (00)
    Indeterminate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate state (11)
    IndeterminateOrFaulty = 3,
}

impl DoublePointValue {
    /// Decode the two low-order bits.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Indeterminate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::IndeterminateOrFaulty,
        }
    }

    pub fn is_determined(&self) -> bool {
        matches!(self, Self::Off | Self::On)
    }
}

/// Double-point information with quality (DIQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoublePoint {
    pub value: DoublePointValue,
    pub quality: QualityDescriptor,
}

impl DoublePoint {
    pub fn new(value: DoublePointValue) -> Self {
        Self {
            value,
            quality: QualityDescriptor::default(),
        }
    }

    pub fn from_u8(value: u8) -> Self {
        Self {
            value: DoublePointValue::from_u8(value),
            quality: QualityDescriptor::from_bits(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        self.value as u8 | self.quality.bits()
    }
}

/// Value with transient state indication (VTI).
///
/// The value is a 7-bit two's complement number, -64..=63.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPosition {
    pub value: i8,
    pub transient: bool,
}

impl StepPosition {
    /// Values outside -64..=63 are clamped.
    pub fn new(value: i8, transient: bool) -> Self {
        Self {
            value: value.clamp(-64, 63),
            transient,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        Self {
            value: ((value << 1) as i8) >> 1,
            transient: value & 0x80 != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        (self.value as u8 & 0x7F) | flag(self.transient, 0x80)
    }
}

/// Binary counter reading (BCR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinaryCounterReading {
    pub value: i32,
    /// Sequence notation, wraps modulo 32.
    pub sequence: u8,
    /// Counter overflowed in the corresponding integration period (CY).
    pub carry: bool,
    /// Counter was adjusted (CA).
    pub adjusted: bool,
    pub invalid: bool,
}

impl BinaryCounterReading {
    pub fn new(value: i32, sequence: u8) -> Self {
        Self {
            value,
            sequence: sequence % 32,
            ..Default::default()
        }
    }

    pub fn from_bytes(bytes: [u8; 5]) -> Self {
        let flags = bytes[4];
        Self {
            value: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sequence: flags & 0x1F,
            carry: flags & 0x20 != 0,
            adjusted: flags & 0x40 != 0,
            invalid: flags & IV != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 5] {
        let [b0, b1, b2, b3] = self.value.to_le_bytes();
        let flags = (self.sequence & 0x1F)
            | flag(self.carry, 0x20)
            | flag(self.adjusted, 0x40)
            | flag(self.invalid, IV);
        [b0, b1, b2, b3, flags]
    }
}

/// Status and status change detection (SCD) for 16 packed single points.
///
/// Bit `n` of `status` is the current state of point `n`; bit `n` of
/// `changed` is set when that point changed since the last report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusChangeDetection {
    pub status: u16,
    pub changed: u16,
}

impl StatusChangeDetection {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            status: u16::from_le_bytes([bytes[0], bytes[1]]),
            changed: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let [s0, s1] = self.status.to_le_bytes();
        let [c0, c1] = self.changed.to_le_bytes();
        [s0, s1, c0, c1]
    }

    pub fn state(&self, point: u8) -> bool {
        point < 16 && self.status & (1 << point) != 0
    }

    pub fn has_changed(&self, point: u8) -> bool {
        point < 16 && self.changed & (1 << point) != 0
    }
}

/// Qualifier of command, QU field (bits 2-6 of SCO/DCO/RCO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputQualifier {
    /// No additional definition
    #[default]
    Unspecified,
    ShortPulse,
    LongPulse,
    Persistent,
    /// Reserved or private range 4..=31
    Other(u8),
}

impl OutputQualifier {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x1F {
            0 => Self::Unspecified,
            1 => Self::ShortPulse,
            2 => Self::LongPulse,
            3 => Self::Persistent,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::ShortPulse => 1,
            Self::LongPulse => 2,
            Self::Persistent => 3,
            Self::Other(v) => v & 0x1F,
        }
    }
}

/// Qualifier of command (QOC): S/E flag plus QU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Qoc {
    pub qualifier: OutputQualifier,
    /// Select (true) or execute (false).
    pub select: bool,
}

impl Qoc {
    pub fn execute(qualifier: OutputQualifier) -> Self {
        Self {
            qualifier,
            select: false,
        }
    }

    pub fn select(qualifier: OutputQualifier) -> Self {
        Self {
            qualifier,
            select: true,
        }
    }

    /// Decode from a full SCO/DCO/RCO octet.
    fn from_command_octet(value: u8) -> Self {
        Self {
            qualifier: OutputQualifier::from_u8(value >> 2),
            select: value & SE != 0,
        }
    }

    fn bits(&self) -> u8 {
        (self.qualifier.as_u8() << 2) | flag(self.select, SE)
    }
}

/// Single command (SCO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SingleCommand {
    pub state: bool,
    pub qoc: Qoc,
}

impl SingleCommand {
    pub fn new(state: bool, qoc: Qoc) -> Self {
        Self { state, qoc }
    }

    pub fn from_u8(value: u8) -> Self {
        Self {
            state: value & 0x01 != 0,
            qoc: Qoc::from_command_octet(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        flag(self.state, 0x01) | self.qoc.bits()
    }
}

/// Two-bit command state of DCO and RCO.
///
/// Only 1 and 2 are permitted; 0 and 3 still decode so a controlled station
/// can reject them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandState {
    NotPermitted0,
    /// DCO: OFF, RCO: next step lower.
    Off,
    /// DCO: ON, RCO: next step higher.
    On,
    NotPermitted3,
}

impl CommandState {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::NotPermitted0,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::NotPermitted3,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::NotPermitted0 => 0,
            Self::Off => 1,
            Self::On => 2,
            Self::NotPermitted3 => 3,
        }
    }

    pub fn is_permitted(&self) -> bool {
        matches!(self, Self::Off | Self::On)
    }
}

/// Double command (DCO). Also used for the regulating step command (RCO),
/// where `Off` means lower and `On` means higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DoubleCommand {
    pub state: CommandState,
    pub qoc: Qoc,
}

impl DoubleCommand {
    pub fn new(state: CommandState, qoc: Qoc) -> Self {
        Self { state, qoc }
    }

    pub fn from_u8(value: u8) -> Self {
        Self {
            state: CommandState::from_u8(value),
            qoc: Qoc::from_command_octet(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        self.state.as_u8() | self.qoc.bits()
    }
}

/// Qualifier of set-point command (QOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Qos {
    /// QL, 0 = default, 1..=63 reserved, 64..=127 private.
    pub ql: u8,
    pub select: bool,
}

impl Qos {
    pub fn execute() -> Self {
        Self::default()
    }

    pub fn select() -> Self {
        Self {
            ql: 0,
            select: true,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        Self {
            ql: value & 0x7F,
            select: value & SE != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        (self.ql & 0x7F) | flag(self.select, SE)
    }
}

/// Qualifier of interrogation (QOI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qoi(pub u8);

impl Qoi {
    /// Station interrogation (global).
    pub const STATION: Self = Self(20);

    /// Group interrogation, `group` in 1..=16.
    pub fn group(group: u8) -> Option<Self> {
        (1..=16).contains(&group).then(|| Self(20 + group))
    }

    /// 0 for station interrogation, 1..=16 for a group, `None` if out of range.
    pub fn group_number(&self) -> Option<u8> {
        (20..=36).contains(&self.0).then(|| self.0 - 20)
    }
}

/// Freeze/reset action of a counter interrogation (FRZ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FreezeAction {
    /// Read without freeze or reset.
    #[default]
    Read,
    Freeze,
    FreezeWithReset,
    Reset,
}

/// Qualifier of counter interrogation (QCC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qcc {
    /// RQT: 1..=4 counter group, 5 general request.
    pub request: u8,
    pub freeze: FreezeAction,
}

impl Qcc {
    pub const GENERAL_REQUEST: u8 = 5;

    pub fn general(freeze: FreezeAction) -> Self {
        Self {
            request: Self::GENERAL_REQUEST,
            freeze,
        }
    }

    /// Counter group request, `group` in 1..=4.
    pub fn group(group: u8, freeze: FreezeAction) -> Option<Self> {
        (1..=4)
            .contains(&group)
            .then_some(Self { request: group, freeze })
    }

    /// 0 for the general request, 1..=4 for a group, `None` if out of range.
    pub fn group_number(&self) -> Option<u8> {
        match self.request {
            Self::GENERAL_REQUEST => Some(0),
            g @ 1..=4 => Some(g),
            _ => None,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        let freeze = match value >> 6 {
            0 => FreezeAction::Read,
            1 => FreezeAction::Freeze,
            2 => FreezeAction::FreezeWithReset,
            _ => FreezeAction::Reset,
        };
        Self {
            request: value & 0x3F,
            freeze,
        }
    }

    pub fn as_u8(&self) -> u8 {
        let frz = match self.freeze {
            FreezeAction::Read => 0,
            FreezeAction::Freeze => 1,
            FreezeAction::FreezeWithReset => 2,
            FreezeAction::Reset => 3,
        };
        (self.request & 0x3F) | (frz << 6)
    }
}

/// Qualifier of reset process command (QRP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qrp(pub u8);

impl Qrp {
    /// General reset of process.
    pub const GENERAL: Self = Self(1);
    /// Reset of pending information with time tag of the event buffer.
    pub const TIME_TAGGED_EVENTS: Self = Self(2);

    pub fn is_defined(&self) -> bool {
        matches!(self.0, 1 | 2)
    }
}

/// Cause of initialization (COI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coi {
    /// 0 local power switch on, 1 local manual reset, 2 remote reset.
    pub cause: u8,
    /// Initialization after change of local parameters.
    pub parameters_changed: bool,
}

impl Coi {
    pub fn from_u8(value: u8) -> Self {
        Self {
            cause: value & 0x7F,
            parameters_changed: value & 0x80 != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        (self.cause & 0x7F) | flag(self.parameters_changed, 0x80)
    }
}

/// Normalized value (NVA) as a fraction in -1.0..1.0.
pub fn normalized_to_f32(raw: i16) -> f32 {
    raw as f32 / 32768.0
}

/// Fraction in -1.0..1.0 to NVA, saturating at the range limits.
pub fn f32_to_normalized(value: f32) -> i16 {
    (value * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siq_quality_bits_independent() {
        for bit in [BL, SB, NT, IV] {
            for value in [false, true] {
                let raw = bit | flag(value, 0x01);
                let sp = SinglePoint::from_u8(raw);
                assert_eq!(sp.value, value);
                assert_eq!(sp.as_u8(), raw);
            }
        }
        let sp = SinglePoint::from_u8(0x11);
        assert!(sp.quality.blocked);
        assert!(!sp.quality.invalid);
    }

    #[test]
    fn test_diq_states() {
        for raw in 0u8..4 {
            let dp = DoublePoint::from_u8(raw | NT);
            assert_eq!(dp.as_u8(), raw | NT);
            assert!(dp.quality.not_topical);
        }
        assert!(DoublePointValue::On.is_determined());
        assert!(!DoublePointValue::IndeterminateOrFaulty.is_determined());
    }

    #[test]
    fn test_qds_overflow_separate() {
        let q = MeasuredQuality::from_u8(OV | SB);
        assert!(q.overflow && q.substituted);
        assert!(!q.blocked && !q.invalid && !q.not_topical);
        assert_eq!(q.as_u8(), 0x21);
        assert!(MeasuredQuality::default().is_good());
    }

    #[test]
    fn test_vti_twos_complement() {
        assert_eq!(StepPosition::from_u8(0x3F).value, 63);
        assert_eq!(StepPosition::from_u8(0x40).value, -64);
        assert_eq!(StepPosition::from_u8(0x7F).value, -1);
        let vti = StepPosition::from_u8(0xFE);
        assert_eq!(vti.value, -2);
        assert!(vti.transient);
        assert_eq!(vti.as_u8(), 0xFE);
        assert_eq!(StepPosition::new(100, false).value, 63);
    }

    #[test]
    fn test_bcr_layout() {
        let bcr = BinaryCounterReading {
            value: -2,
            sequence: 31,
            carry: true,
            adjusted: false,
            invalid: true,
        };
        let bytes = bcr.to_bytes();
        assert_eq!(bytes, [0xFE, 0xFF, 0xFF, 0xFF, 0xBF]);
        assert_eq!(BinaryCounterReading::from_bytes(bytes), bcr);
        assert_eq!(BinaryCounterReading::new(5, 33).sequence, 1);
    }

    #[test]
    fn test_scd_points() {
        let scd = StatusChangeDetection::from_bytes([0x05, 0x80, 0x04, 0x00]);
        assert!(scd.state(0));
        assert!(!scd.state(1));
        assert!(scd.state(15));
        assert!(scd.has_changed(2));
        assert!(!scd.has_changed(0));
        assert!(!scd.state(16));
    }

    #[test]
    fn test_sco_layout() {
        let sco = SingleCommand::new(true, Qoc::select(OutputQualifier::LongPulse));
        assert_eq!(sco.as_u8(), 0x89);
        assert_eq!(SingleCommand::from_u8(0x89), sco);
        let exec = SingleCommand::from_u8(0x0C);
        assert!(!exec.state);
        assert!(!exec.qoc.select);
        assert_eq!(exec.qoc.qualifier, OutputQualifier::Persistent);
    }

    #[test]
    fn test_dco_not_permitted_values_decode() {
        for raw in [0x00u8, 0x03, 0x83] {
            let dco = DoubleCommand::from_u8(raw);
            assert!(!dco.state.is_permitted());
            assert_eq!(dco.as_u8(), raw);
        }
        let on = DoubleCommand::from_u8(0x06);
        assert_eq!(on.state, CommandState::On);
        assert_eq!(on.qoc.qualifier, OutputQualifier::ShortPulse);
    }

    #[test]
    fn test_qos_qoi_qcc_qrp() {
        assert_eq!(Qos::from_u8(0x85), Qos { ql: 5, select: true });
        assert_eq!(Qos::select().as_u8(), 0x80);

        assert_eq!(Qoi::group(16), Some(Qoi(36)));
        assert_eq!(Qoi::group(0), None);
        assert_eq!(Qoi::STATION.group_number(), Some(0));
        assert_eq!(Qoi(19).group_number(), None);

        let qcc = Qcc::from_u8(0x45);
        assert_eq!(qcc.request, Qcc::GENERAL_REQUEST);
        assert_eq!(qcc.freeze, FreezeAction::Freeze);
        assert_eq!(qcc.as_u8(), 0x45);
        assert_eq!(Qcc::group(4, FreezeAction::Reset).map(|q| q.as_u8()), Some(0xC4));
        assert_eq!(Qcc::from_u8(6).group_number(), None);

        assert!(Qrp::TIME_TAGGED_EVENTS.is_defined());
        assert!(!Qrp(0).is_defined());
    }

    #[test]
    fn test_coi() {
        let coi = Coi::from_u8(0x82);
        assert_eq!(coi.cause, 2);
        assert!(coi.parameters_changed);
        assert_eq!(coi.as_u8(), 0x82);
    }

    #[test]
    fn test_normalized_conversion() {
        assert_eq!(normalized_to_f32(16384), 0.5);
        assert_eq!(f32_to_normalized(-1.0), i16::MIN);
        assert_eq!(f32_to_normalized(1.0), i16::MAX);
        assert_eq!(f32_to_normalized(0.25), 8192);
    }
}
