//! APCI framer for tokio.
//!
//! Frames are split and validated here; the ASDU payload of an I-frame is
//! handed on as raw octets, because its layout depends on link parameters
//! the session owns.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Iec104Error;
use crate::types::{
    Apci, FrameType, UFunction, MAX_APDU_LENGTH, MAX_ASDU_LENGTH, MIN_APDU_LENGTH, START_BYTE,
};

const HEADER_LEN: usize = 2;

/// An IEC 104 APDU (Application Protocol Data Unit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub apci: Apci,
    /// ASDU octets; empty for S- and U-frames.
    pub asdu: Bytes,
}

impl Apdu {
    pub fn i_frame(send_seq: u16, recv_seq: u16, asdu: Bytes) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            asdu,
        }
    }

    pub fn s_frame(recv_seq: u16) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            asdu: Bytes::new(),
        }
    }

    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: Bytes::new(),
        }
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.apci.frame_type()
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if !self.asdu.is_empty() {
            write!(f, " len={}", self.asdu.len())?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 framer.
///
/// A wrong start octet or a length outside 4..=253 is not resynchronised;
/// the decoder reports [`Iec104Error::InvalidFrame`] and the connection is
/// expected to be dropped.
///
/// ```rust,ignore
/// let mut framed = Framed::new(stream, Iec104Codec::new());
/// framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
/// while let Some(apdu) = framed.next().await {
///     println!("received {}", apdu?);
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Iec104Codec;

impl Iec104Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec104Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != START_BYTE {
            return Err(Iec104Error::invalid_frame(format!(
                "bad start octet 0x{:02X}",
                src[0]
            )));
        }
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = src[1] as usize;
        if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
            return Err(Iec104Error::invalid_frame(format!("bad length {length}")));
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let control = src.split_to(MIN_APDU_LENGTH);
        let apci = Apci::parse(&control)?;
        let asdu = src.split_to(length - MIN_APDU_LENGTH).freeze();

        match apci.frame_type() {
            FrameType::IFrame if asdu.is_empty() => {
                Err(Iec104Error::invalid_frame_static("I-frame without ASDU"))
            }
            FrameType::SFrame | FrameType::UFrame if !asdu.is_empty() => Err(Iec104Error::invalid_frame(
                format!("{apci} with {} trailing octets", asdu.len()),
            )),
            _ => Ok(Some(Apdu { apci, asdu })),
        }
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let is_i_frame = item.apci.frame_type() == FrameType::IFrame;
        if is_i_frame == item.asdu.is_empty() {
            return Err(Iec104Error::Codec(
                "only I-frames carry an ASDU, and they must".into(),
            ));
        }
        if item.asdu.len() > MAX_ASDU_LENGTH {
            return Err(Iec104Error::Codec(
                format!("ASDU of {} octets exceeds {MAX_ASDU_LENGTH}", item.asdu.len()).into(),
            ));
        }

        dst.reserve(HEADER_LEN + MIN_APDU_LENGTH + item.asdu.len());
        dst.extend_from_slice(&item.apci.encode_header(item.asdu.len()));
        dst.extend_from_slice(&item.asdu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_decode_u_frame() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x07, 0x00, 0x00, 0x00][..]);

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci, Apci::u_frame(UFunction::StartDtAct));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_s_frame() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x01, 0x00, 0xC8, 0x00][..]);

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.frame_type(), FrameType::SFrame);
        assert_eq!(apdu.apci.recv_seq(), Some(100));
    }

    #[test]
    fn test_decode_i_frame_keeps_payload() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(
            &[
                0x68, 0x0E, 0x02, 0x00, 0x04, 0x00, 100, 0x01, 0x06, 0x00, 0x01, 0x00, 0, 0, 0, 20,
                0x68,
            ][..],
        );

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci, Apci::i_frame(1, 2));
        assert_eq!(&apdu.asdu[..], &[100, 0x01, 0x06, 0x00, 0x01, 0x00, 0, 0, 0, 20]);
        // next frame's start octet stays buffered
        assert_eq!(&buf[..], &[0x68]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_frames() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();

        assert_ok!(codec.encode(Apdu::u_frame(UFunction::TestFrCon), &mut buf));
        assert_ok!(codec.encode(Apdu::s_frame(100), &mut buf));
        assert_eq!(
            &buf[..],
            &[0x68, 0x04, 0x83, 0x00, 0x00, 0x00, 0x68, 0x04, 0x01, 0x00, 0xC8, 0x00]
        );

        buf.clear();
        let payload = Bytes::from_static(&[100, 0x01, 0x06, 0x00, 0x01, 0x00, 0, 0, 0, 20]);
        assert_ok!(codec.encode(Apdu::i_frame(10, 5, payload), &mut buf));
        assert_eq!(buf[0], START_BYTE);
        assert_eq!(buf[1], 14);
        assert_eq!(&buf[2..6], &[0x14, 0x00, 0x0A, 0x00]);
    }

    #[test]
    fn test_encode_rejects_inconsistent_frames() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();

        assert_err!(codec.encode(Apdu::i_frame(0, 0, Bytes::new()), &mut buf));
        let mut s = Apdu::s_frame(0);
        s.asdu = Bytes::from_static(&[1]);
        assert_err!(codec.encode(s, &mut buf));
        let oversize = Bytes::from(vec![0u8; MAX_ASDU_LENGTH + 1]);
        assert_err!(codec.encode(Apdu::i_frame(0, 0, oversize), &mut buf));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = Iec104Codec::new();

        let mut buf = BytesMut::from(&[0x68][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0x04, 0x43]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x00, 0x00, 0x00]);
        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci, Apci::u_frame(UFunction::TestFrAct));
    }

    #[test]
    fn test_decode_rejects_bad_start_octet() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&[0xFF, 0x68, 0x04, 0x07, 0x00, 0x00, 0x00][..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Iec104Error::InvalidFrame(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut codec = Iec104Codec::new();
        for len in [0x00, 0x03, 0xFE, 0xFF] {
            let mut buf = BytesMut::from(&[0x68, len, 0x07, 0x00, 0x00, 0x00][..]);
            assert!(matches!(
                codec.decode(&mut buf),
                Err(Iec104Error::InvalidFrame(_))
            ));
        }
    }

    #[test]
    fn test_decode_rejects_length_type_mismatch() {
        let mut codec = Iec104Codec::new();

        let mut i_without_asdu = BytesMut::from(&[0x68, 0x04, 0x00, 0x00, 0x00, 0x00][..]);
        assert_err!(codec.decode(&mut i_without_asdu));

        let mut u_with_data = BytesMut::from(&[0x68, 0x05, 0x07, 0x00, 0x00, 0x00, 0x01][..]);
        assert_err!(codec.decode(&mut u_with_data));
    }

    #[test]
    fn test_roundtrip_control_frames() {
        let mut codec = Iec104Codec::new();
        for original in [
            Apdu::u_frame(UFunction::StartDtCon),
            Apdu::u_frame(UFunction::StopDtAct),
            Apdu::s_frame(0),
            Apdu::s_frame(32767),
        ] {
            let mut buf = BytesMut::new();
            codec.encode(original.clone(), &mut buf).unwrap();
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(original));
        }
    }
}
