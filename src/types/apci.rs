//! APCI (Application Protocol Control Information).
//!
//! Every APDU starts with a start octet, a length octet and four control
//! octets. The two low-order bits of the first control octet select the
//! frame format:
//!
//! ```text
//!            CF1            CF2         CF3            CF4
//! I-frame  N(S) lo7 | 0   N(S) hi8    N(R) lo7 | 0   N(R) hi8
//! S-frame  0000 00 | 01   0           N(R) lo7 | 0   N(R) hi8
//! U-frame  TT CC SS | 11  0           0              0
//! ```

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Control field length; also the smallest legal value of the length octet.
pub const MIN_APDU_LENGTH: usize = 4;

/// Largest legal value of the length octet.
pub const MAX_APDU_LENGTH: usize = 253;

/// Largest ASDU carried in one I-frame.
pub const MAX_ASDU_LENGTH: usize = MAX_APDU_LENGTH - MIN_APDU_LENGTH;

/// Sequence numbers are 15 bits wide.
pub const SEQ_MODULUS: u16 = 1 << 15;

/// Next sequence number after `seq`.
#[inline]
pub const fn seq_next(seq: u16) -> u16 {
    (seq + 1) % SEQ_MODULUS
}

/// Forward distance from `from` to `to` in sequence space.
#[inline]
pub const fn seq_distance(from: u16, to: u16) -> u16 {
    (to + SEQ_MODULUS - from) % SEQ_MODULUS
}

/// APCI frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Numbered information transfer.
    IFrame,
    /// Numbered supervisory function (acknowledgement).
    SFrame,
    /// Unnumbered control function.
    UFrame,
}

/// U-frame functions. Exactly one function bit is set per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UFunction {
    StartDtAct,
    StartDtCon,
    StopDtAct,
    StopDtCon,
    TestFrAct,
    TestFrCon,
}

impl UFunction {
    /// Control octet for this function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07,
            Self::StartDtCon => 0x0B,
            Self::StopDtAct => 0x13,
            Self::StopDtCon => 0x23,
            Self::TestFrAct => 0x43,
            Self::TestFrCon => 0x83,
        }
    }

    /// Decode the first control octet of a U-frame.
    #[inline]
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            other => Err(Iec104Error::invalid_frame(format!(
                "unknown U-frame function 0x{other:02X}"
            ))),
        }
    }

    /// Whether this is the activation half of an exchange.
    #[inline]
    pub const fn is_activation(&self) -> bool {
        matches!(self, Self::StartDtAct | Self::StopDtAct | Self::TestFrAct)
    }

    /// Confirmation answering this activation.
    #[inline]
    pub const fn confirmation(&self) -> Option<Self> {
        match self {
            Self::StartDtAct => Some(Self::StartDtCon),
            Self::StopDtAct => Some(Self::StopDtCon),
            Self::TestFrAct => Some(Self::TestFrCon),
            _ => None,
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::StartDtAct => "STARTDT act",
            Self::StartDtCon => "STARTDT con",
            Self::StopDtAct => "STOPDT act",
            Self::StopDtCon => "STOPDT con",
            Self::TestFrAct => "TESTFR act",
            Self::TestFrCon => "TESTFR con",
        }
    }
}

/// Decoded control field of an APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// N(S), 0..=32767
        send_seq: u16,
        /// N(R), 0..=32767
        recv_seq: u16,
    },
    /// S-frame acknowledging everything before `recv_seq`.
    SFrame {
        /// N(R), 0..=32767
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame { function: UFunction },
}

impl Apci {
    /// Create a new I-frame APCI. Sequence numbers are reduced mod 2^15.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame {
            send_seq: send_seq % SEQ_MODULUS,
            recv_seq: recv_seq % SEQ_MODULUS,
        }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame {
            recv_seq: recv_seq % SEQ_MODULUS,
        }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::IFrame { .. } => FrameType::IFrame,
            Self::SFrame { .. } => FrameType::SFrame,
            Self::UFrame { .. } => FrameType::UFrame,
        }
    }

    /// Decode the four control octets.
    pub fn parse(control: &[u8]) -> Result<Self> {
        let [cf1, cf2, cf3, cf4] = match control {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => {
                return Err(Iec104Error::invalid_frame(format!(
                    "control field must be 4 octets, got {}",
                    control.len()
                )))
            }
        };

        match cf1 & 0x03 {
            0x00 | 0x02 => Ok(Self::IFrame {
                send_seq: decode_seq(cf1, cf2),
                recv_seq: decode_seq(cf3, cf4),
            }),
            0x01 => Ok(Self::SFrame {
                recv_seq: decode_seq(cf3, cf4),
            }),
            _ => {
                if cf2 != 0 || cf3 != 0 || cf4 != 0 {
                    return Err(Iec104Error::invalid_frame_static(
                        "U-frame carries non-zero control octets",
                    ));
                }
                Ok(Self::UFrame {
                    function: UFunction::from_control_byte(cf1)?,
                })
            }
        }
    }

    /// Encode the four control octets.
    #[inline]
    pub fn encode(&self) -> [u8; 4] {
        match *self {
            Self::IFrame { send_seq, recv_seq } => {
                let [s_lo, s_hi] = encode_seq(send_seq);
                let [r_lo, r_hi] = encode_seq(recv_seq);
                [s_lo, s_hi, r_lo, r_hi]
            }
            Self::SFrame { recv_seq } => {
                let [r_lo, r_hi] = encode_seq(recv_seq);
                [0x01, 0x00, r_lo, r_hi]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Full 6-octet APCI for an APDU carrying `asdu_len` octets of ASDU.
    #[inline]
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let [c1, c2, c3, c4] = self.encode();
        [
            START_BYTE,
            (MIN_APDU_LENGTH + asdu_len) as u8,
            c1,
            c2,
            c3,
            c4,
        ]
    }

    /// Get the send sequence number (I-frame only).
    #[inline]
    pub fn send_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { send_seq, .. } => Some(*send_seq),
            _ => None,
        }
    }

    /// Get the receive sequence number (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            Self::UFrame { .. } => None,
        }
    }
}

#[inline]
fn decode_seq(lo: u8, hi: u8) -> u16 {
    ((hi as u16) << 7) | ((lo >> 1) as u16)
}

#[inline]
fn encode_seq(seq: u16) -> [u8; 2] {
    [((seq & 0x7F) << 1) as u8, ((seq >> 7) & 0xFF) as u8]
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => write!(f, "I(S={send_seq}, R={recv_seq})"),
            Self::SFrame { recv_seq } => write!(f, "S(R={recv_seq})"),
            Self::UFrame { function } => write!(f, "U({})", function.name()),
        }
    }
}
