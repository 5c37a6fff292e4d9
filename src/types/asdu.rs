//! ASDU (Application Service Data Unit) codec.
//!
//! ```text
//! +---------+-----+-----+------------+----------------+---------------------+
//! | type id | VSQ | COT | originator | common address | information objects |
//! |    1    |  1  |  1  |  0 or 1    |     1 or 2     |        ...          |
//! +---------+-----+-----+------------+----------------+---------------------+
//! ```
//!
//! The widths of the originator and common address fields are link
//! parameters ([`AsduParams`]); the information object address is always
//! three octets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{
    Coi, Cot, Cp56Time2a, InformationObject, Ioa, ObjectValue, Qcc, Qoi, Qrp, TypeId,
    MAX_ASDU_LENGTH, TEST_PATTERN,
};

const IOA_LEN: usize = 3;
const MAX_OBJECTS: usize = 0x7F;

/// Field widths of the ASDU header agreed for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduParams {
    /// Whether the COT is followed by an originator address octet.
    pub originator_address: bool,
    /// Common address width, 1 or 2 octets.
    pub common_address_size: u8,
}

impl Default for AsduParams {
    fn default() -> Self {
        Self {
            originator_address: true,
            common_address_size: 2,
        }
    }
}

impl AsduParams {
    /// Length of the data unit identifier (everything before the first object).
    #[inline]
    pub fn header_len(&self) -> usize {
        3 + usize::from(self.originator_address) + self.common_address_size as usize
    }

    /// Broadcast common address for the configured width.
    #[inline]
    pub fn broadcast_address(&self) -> u16 {
        if self.common_address_size == 1 {
            0xFF
        } else {
            0xFFFF
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.common_address_size, 1 | 2) {
            return Err(Iec104Error::config_static(
                "common address size must be 1 or 2 octets",
            ));
        }
        Ok(())
    }

    /// Largest number of objects of `type_id` that fit in one ASDU.
    pub fn max_objects(&self, type_id: TypeId, sequence: bool) -> usize {
        let room = MAX_ASDU_LENGTH - self.header_len();
        let per_object = type_id.object_len() + if sequence { 0 } else { IOA_LEN };
        let fit = if sequence {
            (room - IOA_LEN) / per_object.max(1)
        } else {
            room / per_object
        };
        fit.min(MAX_OBJECTS)
    }
}

/// Variable structure qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects (1-127)
    pub count: u8,
    /// SQ: objects use consecutive addresses and only the first is sent.
    pub sequence: bool,
}

impl Vsq {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: value & 0x80 != 0,
        }
    }

    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// Data unit identifier. The object count is derived from the object list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduHeader {
    pub type_id: TypeId,
    /// SQ bit of the VSQ.
    pub sequence: bool,
    pub cot: Cot,
    /// T bit: the ASDU was generated under test conditions.
    pub test: bool,
    /// P/N bit: negative confirmation of an activation.
    pub negative: bool,
    /// Originator address (0 if not used)
    pub originator: u8,
    pub common_address: u16,
}

impl AsduHeader {
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            sequence: false,
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    fn cot_octet(&self) -> u8 {
        let test = if self.test { 0x80 } else { 0 };
        let negative = if self.negative { 0x40 } else { 0 };
        self.cot.as_u8() | test | negative
    }
}

/// Application service data unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    pub header: AsduHeader,
    pub objects: Vec<InformationObject>,
}

impl Asdu {
    /// Create an empty ASDU; objects are added with [`push`](Self::push).
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            header: AsduHeader::new(type_id, cot, common_address),
            objects: Vec::new(),
        }
    }

    /// ASDU carrying a single object.
    pub fn single(type_id: TypeId, cot: Cot, common_address: u16, object: InformationObject) -> Self {
        let mut asdu = Self::new(type_id, cot, common_address);
        asdu.objects.push(object);
        asdu
    }

    pub fn push(&mut self, object: InformationObject) -> &mut Self {
        self.objects.push(object);
        self
    }

    /// Set the SQ bit; objects must then have consecutive addresses.
    pub fn with_sequence(mut self, sequence: bool) -> Self {
        self.header.sequence = sequence;
        self
    }

    pub fn with_originator(mut self, originator: u8) -> Self {
        self.header.originator = originator;
        self
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    #[inline]
    pub fn cot(&self) -> Cot {
        self.header.cot
    }

    #[inline]
    pub fn common_address(&self) -> u16 {
        self.header.common_address
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.header.negative
    }

    /// Address of the first object, the correlation key for commands.
    pub fn first_ioa(&self) -> Option<Ioa> {
        self.objects.first().map(|o| o.ioa)
    }

    /// Reply reusing type, addresses and objects, as a controlled station
    /// answers an activation.
    pub fn mirror(&self, cot: Cot, negative: bool) -> Self {
        let mut reply = self.clone();
        reply.header.cot = cot;
        reply.header.negative = negative;
        reply
    }

    // ---- system command constructors ----

    /// C_IC_NA_1 activation.
    pub fn interrogation(common_address: u16, qoi: Qoi) -> Self {
        Self::system(
            TypeId::InterrogationCommand,
            common_address,
            ObjectValue::Interrogation(qoi),
        )
    }

    /// C_CI_NA_1 activation.
    pub fn counter_interrogation(common_address: u16, qcc: Qcc) -> Self {
        Self::system(
            TypeId::CounterInterrogationCommand,
            common_address,
            ObjectValue::CounterInterrogation(qcc),
        )
    }

    /// C_RD_NA_1 request for one object.
    pub fn read(common_address: u16, ioa: Ioa) -> Self {
        Self::single(
            TypeId::ReadCommand,
            Cot::Request,
            common_address,
            InformationObject::new(ioa, ObjectValue::Read),
        )
    }

    /// C_CS_NA_1 activation.
    pub fn clock_sync(common_address: u16, time: Cp56Time2a) -> Self {
        Self::system(
            TypeId::ClockSyncCommand,
            common_address,
            ObjectValue::ClockSync(time),
        )
    }

    /// C_TS_NA_1 activation with the fixed test pattern.
    pub fn test_command(common_address: u16) -> Self {
        Self::system(
            TypeId::TestCommand,
            common_address,
            ObjectValue::Test(TEST_PATTERN),
        )
    }

    /// C_RP_NA_1 activation.
    pub fn reset_process(common_address: u16, qrp: Qrp) -> Self {
        Self::system(
            TypeId::ResetProcessCommand,
            common_address,
            ObjectValue::ResetProcess(qrp),
        )
    }

    /// C_CD_NA_1 activation.
    pub fn delay_acquisition(common_address: u16, delay_ms: u16) -> Self {
        Self::system(
            TypeId::DelayAcquisitionCommand,
            common_address,
            ObjectValue::DelayAcquisition(delay_ms),
        )
    }

    /// M_EI_NA_1 sent by a controlled station after start-up.
    pub fn end_of_initialization(common_address: u16, coi: Coi) -> Self {
        Self::single(
            TypeId::EndOfInitialization,
            Cot::Initialized,
            common_address,
            InformationObject::new(0u32, ObjectValue::EndOfInitialization(coi)),
        )
    }

    fn system(type_id: TypeId, common_address: u16, value: ObjectValue) -> Self {
        Self::single(
            type_id,
            Cot::Activation,
            common_address,
            InformationObject::new(0u32, value),
        )
    }

    // ---- codec ----

    /// Encoded size with the given parameters.
    pub fn encoded_len(&self, params: &AsduParams) -> usize {
        let per_object = self.header.type_id.object_len();
        let addresses = if self.header.sequence {
            IOA_LEN.min(self.objects.len() * IOA_LEN)
        } else {
            self.objects.len() * IOA_LEN
        };
        params.header_len() + addresses + self.objects.len() * per_object
    }

    /// Decode an ASDU from the payload of an I-frame.
    pub fn decode(data: &[u8], params: &AsduParams) -> Result<Self> {
        params.validate()?;
        let header_len = params.header_len();
        if data.len() < header_len {
            return Err(Iec104Error::invalid_asdu(format!(
                "truncated header: {} of {} octets",
                data.len(),
                header_len
            )));
        }

        let type_id = TypeId::from_u8(data[0])?;
        let vsq = Vsq::from_u8(data[1]);
        if vsq.count == 0 {
            return Err(Iec104Error::invalid_asdu_static("object count is zero"));
        }
        let cot = Cot::from_u8(data[2])?;
        let mut pos = 3;
        let originator = if params.originator_address {
            pos += 1;
            data[3]
        } else {
            0
        };
        let common_address = if params.common_address_size == 1 {
            data[pos] as u16
        } else {
            u16::from_le_bytes([data[pos], data[pos + 1]])
        };

        let header = AsduHeader {
            type_id,
            sequence: vsq.sequence,
            cot,
            test: data[2] & 0x80 != 0,
            negative: data[2] & 0x40 != 0,
            originator,
            common_address,
        };

        let count = vsq.count as usize;
        let object_len = type_id.object_len();
        let expected = if vsq.sequence {
            IOA_LEN + count * object_len
        } else {
            count * (IOA_LEN + object_len)
        };
        let mut body = &data[header_len..];
        if body.len() < expected {
            return Err(Iec104Error::invalid_asdu(format!(
                "truncated {}: {} objects need {} octets, got {}",
                type_id,
                count,
                expected,
                body.len()
            )));
        }
        if body.len() > expected {
            return Err(Iec104Error::invalid_asdu(format!(
                "{} trailing octets after {} objects",
                body.len() - expected,
                count
            )));
        }

        let mut objects = Vec::with_capacity(count);
        if vsq.sequence {
            let base = read_ioa(&mut body).value();
            if base + count as u32 - 1 > Ioa::MAX {
                return Err(Iec104Error::invalid_asdu(format!(
                    "sequence of {count} objects from {base} exceeds the address range"
                )));
            }
            for i in 0..count {
                let ioa = Ioa::new(base + i as u32);
                objects.push(InformationObject::decode_body(ioa, type_id, &mut body));
            }
        } else {
            for _ in 0..count {
                let ioa = read_ioa(&mut body);
                objects.push(InformationObject::decode_body(ioa, type_id, &mut body));
            }
        }

        Ok(Self { header, objects })
    }

    /// Encode into `buf`. Fails without writing anything if the ASDU is not
    /// representable with `params`.
    pub fn encode(&self, params: &AsduParams, buf: &mut BytesMut) -> Result<()> {
        params.validate()?;
        let header = &self.header;
        let count = self.objects.len();
        if count == 0 || count > MAX_OBJECTS {
            return Err(Iec104Error::invalid_asdu(format!(
                "object count {count} outside 1..=127"
            )));
        }
        if params.common_address_size == 1 && header.common_address > 0xFF {
            return Err(Iec104Error::invalid_asdu(format!(
                "common address {} does not fit one octet",
                header.common_address
            )));
        }
        for obj in &self.objects {
            obj.validate(header.type_id)?;
        }
        if header.sequence {
            let base = self.objects[0].ioa.value();
            let contiguous = self
                .objects
                .iter()
                .enumerate()
                .all(|(i, o)| o.ioa.value() == base + i as u32);
            if !contiguous {
                return Err(Iec104Error::invalid_asdu_static(
                    "sequence flag set but addresses are not consecutive",
                ));
            }
        }
        let len = self.encoded_len(params);
        if len > MAX_ASDU_LENGTH {
            return Err(Iec104Error::invalid_asdu(format!(
                "ASDU length {len} exceeds {MAX_ASDU_LENGTH}"
            )));
        }

        buf.reserve(len);
        buf.put_u8(header.type_id.as_u8());
        buf.put_u8(
            Vsq {
                count: count as u8,
                sequence: header.sequence,
            }
            .as_u8(),
        );
        buf.put_u8(header.cot_octet());
        if params.originator_address {
            buf.put_u8(header.originator);
        }
        if params.common_address_size == 1 {
            buf.put_u8(header.common_address as u8);
        } else {
            buf.put_u16_le(header.common_address);
        }
        for (i, obj) in self.objects.iter().enumerate() {
            if !header.sequence || i == 0 {
                buf.put_slice(&obj.ioa.to_bytes());
            }
            obj.encode_body(buf);
        }
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self, params: &AsduParams) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len(params));
        self.encode(params, &mut buf)?;
        Ok(buf.freeze())
    }
}

impl std::fmt::Display for Asdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{} CA={} n={}",
            self.header.type_id,
            self.header.cot,
            if self.header.negative { " neg" } else { "" },
            self.header.common_address,
            self.objects.len()
        )
    }
}

fn read_ioa(buf: &mut &[u8]) -> Ioa {
    let ioa = Ioa::from_bytes([buf[0], buf[1], buf[2]]);
    *buf = &buf[IOA_LEN..];
    ioa
}

/// Negative reply built from the raw octets of an ASDU that failed to
/// decode: the COT is replaced by `cause` with the P/N bit set, the T bit
/// is kept. `None` if the data unit identifier itself is incomplete.
pub fn mirror_raw(raw: &[u8], params: &AsduParams, cause: Cot) -> Option<Bytes> {
    if raw.len() < params.header_len() || raw.len() > MAX_ASDU_LENGTH {
        return None;
    }
    let mut reply = BytesMut::from(raw);
    reply[2] = (raw[2] & 0x80) | 0x40 | cause.as_u8();
    Some(reply.freeze())
}
