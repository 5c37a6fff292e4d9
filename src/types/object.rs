//! Information objects and their type-dispatched codec.

use bytes::{Buf, BufMut};

use crate::error::{Iec104Error, Result};
use crate::types::{
    BinaryCounterReading, Coi, Cp24Time2a, Cp56Time2a, DoubleCommand, DoublePoint,
    MeasuredQuality, Qcc, Qoi, Qos, Qrp, SingleCommand, SinglePoint, StatusChangeDetection,
    StepPosition, TimeTag, TimeTagKind, TypeId,
};

/// Information object address, 3 octets on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ioa(pub u32);

impl Ioa {
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & Self::MAX)
    }

    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; 3] {
        let [b0, b1, b2, _] = self.0.to_le_bytes();
        [b0, b1, b2]
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Ioa {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// Value carried by one information object.
///
/// The variant is selected by the ASDU type identifier; time tags are kept
/// separately on [`InformationObject`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectValue {
    SinglePoint(SinglePoint),
    DoublePoint(DoublePoint),
    StepPosition(StepPosition, MeasuredQuality),
    Bitstring(u32, MeasuredQuality),
    /// Raw NVA; see [`normalized_to_f32`](crate::types::normalized_to_f32).
    Normalized(i16, MeasuredQuality),
    NormalizedNoQuality(i16),
    Scaled(i16, MeasuredQuality),
    Float(f32, MeasuredQuality),
    Counter(BinaryCounterReading),
    PackedSinglePoint(StatusChangeDetection, MeasuredQuality),
    SingleCommand(SingleCommand),
    DoubleCommand(DoubleCommand),
    RegulatingStep(DoubleCommand),
    SetpointNormalized(i16, Qos),
    SetpointScaled(i16, Qos),
    SetpointFloat(f32, Qos),
    BitstringCommand(u32),
    EndOfInitialization(Coi),
    Interrogation(Qoi),
    CounterInterrogation(Qcc),
    Read,
    ClockSync(Cp56Time2a),
    /// Test pattern (C_TS_NA_1) or test sequence counter (C_TS_TA_1).
    Test(u16),
    ResetProcess(Qrp),
    /// Delay in milliseconds (CP16Time2a).
    DelayAcquisition(u16),
}

impl ObjectValue {
    /// Whether this value kind is the element of `type_id`.
    pub fn fits(&self, type_id: TypeId) -> bool {
        use TypeId as T;
        match self {
            Self::SinglePoint(_) => matches!(
                type_id,
                T::SinglePoint | T::SinglePointTime24 | T::SinglePointTime56
            ),
            Self::DoublePoint(_) => matches!(
                type_id,
                T::DoublePoint | T::DoublePointTime24 | T::DoublePointTime56
            ),
            Self::StepPosition(..) => matches!(
                type_id,
                T::StepPosition | T::StepPositionTime24 | T::StepPositionTime56
            ),
            Self::Bitstring(..) => matches!(
                type_id,
                T::Bitstring32 | T::Bitstring32Time24 | T::Bitstring32Time56
            ),
            Self::Normalized(..) => matches!(
                type_id,
                T::MeasuredNormalized | T::MeasuredNormalizedTime24 | T::MeasuredNormalizedTime56
            ),
            Self::NormalizedNoQuality(_) => type_id == T::MeasuredNormalizedNoQuality,
            Self::Scaled(..) => matches!(
                type_id,
                T::MeasuredScaled | T::MeasuredScaledTime24 | T::MeasuredScaledTime56
            ),
            Self::Float(..) => matches!(
                type_id,
                T::MeasuredFloat | T::MeasuredFloatTime24 | T::MeasuredFloatTime56
            ),
            Self::Counter(_) => matches!(
                type_id,
                T::IntegratedTotals | T::IntegratedTotalsTime24 | T::IntegratedTotalsTime56
            ),
            Self::PackedSinglePoint(..) => type_id == T::PackedSinglePoint,
            Self::SingleCommand(_) => {
                matches!(type_id, T::SingleCommand | T::SingleCommandTime56)
            }
            Self::DoubleCommand(_) => {
                matches!(type_id, T::DoubleCommand | T::DoubleCommandTime56)
            }
            Self::RegulatingStep(_) => matches!(
                type_id,
                T::RegulatingStepCommand | T::RegulatingStepCommandTime56
            ),
            Self::SetpointNormalized(..) => {
                matches!(type_id, T::SetpointNormalized | T::SetpointNormalizedTime56)
            }
            Self::SetpointScaled(..) => {
                matches!(type_id, T::SetpointScaled | T::SetpointScaledTime56)
            }
            Self::SetpointFloat(..) => {
                matches!(type_id, T::SetpointFloat | T::SetpointFloatTime56)
            }
            Self::BitstringCommand(_) => {
                matches!(type_id, T::Bitstring32Command | T::Bitstring32CommandTime56)
            }
            Self::EndOfInitialization(_) => type_id == T::EndOfInitialization,
            Self::Interrogation(_) => type_id == T::InterrogationCommand,
            Self::CounterInterrogation(_) => type_id == T::CounterInterrogationCommand,
            Self::Read => type_id == T::ReadCommand,
            Self::ClockSync(_) => type_id == T::ClockSyncCommand,
            Self::Test(_) => matches!(type_id, T::TestCommand | T::TestCommandTime56),
            Self::ResetProcess(_) => type_id == T::ResetProcessCommand,
            Self::DelayAcquisition(_) => type_id == T::DelayAcquisitionCommand,
        }
    }

    /// The S/E flag of a process command, `None` for anything else.
    pub fn select_flag(&self) -> Option<bool> {
        match self {
            Self::SingleCommand(c) => Some(c.qoc.select),
            Self::DoubleCommand(c) | Self::RegulatingStep(c) => Some(c.qoc.select),
            Self::SetpointNormalized(_, q) | Self::SetpointScaled(_, q) => Some(q.select),
            Self::SetpointFloat(_, q) => Some(q.select),
            _ => None,
        }
    }

    /// Copy with the S/E flag replaced; other values are returned unchanged.
    pub fn with_select(mut self, select: bool) -> Self {
        match &mut self {
            Self::SingleCommand(c) => c.qoc.select = select,
            Self::DoubleCommand(c) | Self::RegulatingStep(c) => c.qoc.select = select,
            Self::SetpointNormalized(_, q)
            | Self::SetpointScaled(_, q)
            | Self::SetpointFloat(_, q) => q.select = select,
            _ => {}
        }
        self
    }

    /// Decode the element of `type_id`. `buf` must hold at least
    /// `type_id.element_len()` octets.
    fn decode(type_id: TypeId, buf: &mut &[u8]) -> Self {
        use TypeId as T;
        match type_id {
            T::SinglePoint | T::SinglePointTime24 | T::SinglePointTime56 => {
                Self::SinglePoint(SinglePoint::from_u8(buf.get_u8()))
            }
            T::DoublePoint | T::DoublePointTime24 | T::DoublePointTime56 => {
                Self::DoublePoint(DoublePoint::from_u8(buf.get_u8()))
            }
            T::StepPosition | T::StepPositionTime24 | T::StepPositionTime56 => {
                let vti = StepPosition::from_u8(buf.get_u8());
                Self::StepPosition(vti, MeasuredQuality::from_u8(buf.get_u8()))
            }
            T::Bitstring32 | T::Bitstring32Time24 | T::Bitstring32Time56 => {
                let bsi = buf.get_u32_le();
                Self::Bitstring(bsi, MeasuredQuality::from_u8(buf.get_u8()))
            }
            T::MeasuredNormalized | T::MeasuredNormalizedTime24 | T::MeasuredNormalizedTime56 => {
                let nva = buf.get_i16_le();
                Self::Normalized(nva, MeasuredQuality::from_u8(buf.get_u8()))
            }
            T::MeasuredNormalizedNoQuality => Self::NormalizedNoQuality(buf.get_i16_le()),
            T::MeasuredScaled | T::MeasuredScaledTime24 | T::MeasuredScaledTime56 => {
                let sva = buf.get_i16_le();
                Self::Scaled(sva, MeasuredQuality::from_u8(buf.get_u8()))
            }
            T::MeasuredFloat | T::MeasuredFloatTime24 | T::MeasuredFloatTime56 => {
                let value = buf.get_f32_le();
                Self::Float(value, MeasuredQuality::from_u8(buf.get_u8()))
            }
            T::IntegratedTotals | T::IntegratedTotalsTime24 | T::IntegratedTotalsTime56 => {
                Self::Counter(BinaryCounterReading::from_bytes(take(buf)))
            }
            T::PackedSinglePoint => {
                let scd = StatusChangeDetection::from_bytes(take(buf));
                Self::PackedSinglePoint(scd, MeasuredQuality::from_u8(buf.get_u8()))
            }
            T::SingleCommand | T::SingleCommandTime56 => {
                Self::SingleCommand(SingleCommand::from_u8(buf.get_u8()))
            }
            T::DoubleCommand | T::DoubleCommandTime56 => {
                Self::DoubleCommand(DoubleCommand::from_u8(buf.get_u8()))
            }
            T::RegulatingStepCommand | T::RegulatingStepCommandTime56 => {
                Self::RegulatingStep(DoubleCommand::from_u8(buf.get_u8()))
            }
            T::SetpointNormalized | T::SetpointNormalizedTime56 => {
                let nva = buf.get_i16_le();
                Self::SetpointNormalized(nva, Qos::from_u8(buf.get_u8()))
            }
            T::SetpointScaled | T::SetpointScaledTime56 => {
                let sva = buf.get_i16_le();
                Self::SetpointScaled(sva, Qos::from_u8(buf.get_u8()))
            }
            T::SetpointFloat | T::SetpointFloatTime56 => {
                let value = buf.get_f32_le();
                Self::SetpointFloat(value, Qos::from_u8(buf.get_u8()))
            }
            T::Bitstring32Command | T::Bitstring32CommandTime56 => {
                Self::BitstringCommand(buf.get_u32_le())
            }
            T::EndOfInitialization => Self::EndOfInitialization(Coi::from_u8(buf.get_u8())),
            T::InterrogationCommand => Self::Interrogation(Qoi(buf.get_u8())),
            T::CounterInterrogationCommand => {
                Self::CounterInterrogation(Qcc::from_u8(buf.get_u8()))
            }
            T::ReadCommand => Self::Read,
            T::ClockSyncCommand => Self::ClockSync(Cp56Time2a::from_bytes(take(buf))),
            T::TestCommand | T::TestCommandTime56 => Self::Test(buf.get_u16_le()),
            T::ResetProcessCommand => Self::ResetProcess(Qrp(buf.get_u8())),
            T::DelayAcquisitionCommand => Self::DelayAcquisition(buf.get_u16_le()),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        match *self {
            Self::SinglePoint(sp) => buf.put_u8(sp.as_u8()),
            Self::DoublePoint(dp) => buf.put_u8(dp.as_u8()),
            Self::StepPosition(vti, q) => {
                buf.put_u8(vti.as_u8());
                buf.put_u8(q.as_u8());
            }
            Self::Bitstring(bsi, q) => {
                buf.put_u32_le(bsi);
                buf.put_u8(q.as_u8());
            }
            Self::Normalized(v, q) | Self::Scaled(v, q) => {
                buf.put_i16_le(v);
                buf.put_u8(q.as_u8());
            }
            Self::NormalizedNoQuality(v) => buf.put_i16_le(v),
            Self::Float(v, q) => {
                buf.put_f32_le(v);
                buf.put_u8(q.as_u8());
            }
            Self::Counter(bcr) => buf.put_slice(&bcr.to_bytes()),
            Self::PackedSinglePoint(scd, q) => {
                buf.put_slice(&scd.to_bytes());
                buf.put_u8(q.as_u8());
            }
            Self::SingleCommand(sco) => buf.put_u8(sco.as_u8()),
            Self::DoubleCommand(dco) | Self::RegulatingStep(dco) => buf.put_u8(dco.as_u8()),
            Self::SetpointNormalized(v, qos) | Self::SetpointScaled(v, qos) => {
                buf.put_i16_le(v);
                buf.put_u8(qos.as_u8());
            }
            Self::SetpointFloat(v, qos) => {
                buf.put_f32_le(v);
                buf.put_u8(qos.as_u8());
            }
            Self::BitstringCommand(bsi) => buf.put_u32_le(bsi),
            Self::EndOfInitialization(coi) => buf.put_u8(coi.as_u8()),
            Self::Interrogation(qoi) => buf.put_u8(qoi.0),
            Self::CounterInterrogation(qcc) => buf.put_u8(qcc.as_u8()),
            Self::Read => {}
            Self::ClockSync(t) => buf.put_slice(&t.to_bytes()),
            Self::Test(v) | Self::DelayAcquisition(v) => buf.put_u16_le(v),
            Self::ResetProcess(qrp) => buf.put_u8(qrp.0),
        }
    }
}

fn take<const N: usize>(buf: &mut &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    out
}

/// One addressed value inside an ASDU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationObject {
    pub ioa: Ioa,
    pub value: ObjectValue,
    pub time: Option<TimeTag>,
}

impl InformationObject {
    pub fn new(ioa: impl Into<Ioa>, value: ObjectValue) -> Self {
        Self {
            ioa: ioa.into(),
            value,
            time: None,
        }
    }

    pub fn with_time(mut self, time: TimeTag) -> Self {
        self.time = Some(time);
        self
    }

    /// Check value kind and time tag against `type_id`.
    pub fn validate(&self, type_id: TypeId) -> Result<()> {
        if !self.value.fits(type_id) {
            return Err(Iec104Error::invalid_asdu(format!(
                "object {} does not carry a {} element",
                self.ioa, type_id
            )));
        }
        match (type_id.time_tag(), self.time) {
            (TimeTagKind::None, None)
            | (TimeTagKind::Cp24, Some(TimeTag::Cp24(_)))
            | (TimeTagKind::Cp56, Some(TimeTag::Cp56(_))) => Ok(()),
            _ => Err(Iec104Error::invalid_asdu(format!(
                "object {} has wrong time tag for {}",
                self.ioa, type_id
            ))),
        }
    }

    /// Decode element and time tag. The caller has consumed the IOA and
    /// checked that `type_id.object_len()` octets are available.
    pub(crate) fn decode_body(ioa: Ioa, type_id: TypeId, buf: &mut &[u8]) -> Self {
        let value = ObjectValue::decode(type_id, buf);
        let time = match type_id.time_tag() {
            TimeTagKind::None => None,
            TimeTagKind::Cp24 => Some(TimeTag::Cp24(Cp24Time2a::from_bytes(take(buf)))),
            TimeTagKind::Cp56 => Some(TimeTag::Cp56(Cp56Time2a::from_bytes(take(buf)))),
        };
        Self { ioa, value, time }
    }

    /// Encode element and time tag; [`validate`](Self::validate) first.
    pub(crate) fn encode_body<B: BufMut>(&self, buf: &mut B) {
        self.value.encode(buf);
        match self.time {
            Some(TimeTag::Cp24(t)) => buf.put_slice(&t.to_bytes()),
            Some(TimeTag::Cp56(t)) => buf.put_slice(&t.to_bytes()),
            None => {}
        }
    }
}
