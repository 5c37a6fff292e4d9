//! Error types for the IEC 60870-5-104 engine.
//!
//! Errors fall into two families. Fatal errors end the session they occur on
//! (see [`Iec104Error::is_fatal`]); everything else is reported to the single
//! operation that caused it and leaves the link running.

use std::borrow::Cow;

use thiserror::Error;

use crate::types::Cot;

/// Result type alias for IEC 104 operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// IEC 60870-5-104 error types.
#[derive(Debug, Error)]
pub enum Iec104Error {
    /// Transport could not be established or was torn down by the peer.
    #[error("Connection error: {0}")]
    Connection(Cow<'static, str>),

    /// Connection attempt exceeded the configured T0.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer violated the link procedure.
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// Bad start octet, bad length or unknown control field.
    #[error("Invalid frame: {0}")]
    InvalidFrame(Cow<'static, str>),

    /// Structurally invalid or truncated ASDU.
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(Cow<'static, str>),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown cause of transmission: {0}")]
    UnknownCot(u8),

    /// Received send sequence number differs from V(R).
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Received N(R) acknowledges frames that were never sent.
    #[error("Acknowledge {ack} outside window [{oldest}, {next}]")]
    AckOutOfWindow { ack: u16, oldest: u16, next: u16 },

    /// T1 timeout (send confirmation)
    #[error("T1 timeout: no confirmation received")]
    T1Timeout,

    /// TESTFR act was not confirmed within T1.
    #[error("T3 timeout: connection test failed")]
    T3Timeout,

    /// I-frames can only be exchanged after STARTDT.
    #[error("Data transfer not started")]
    NotStarted,

    /// Session is gone; pending operations are cancelled with this error.
    #[error("Link closed")]
    LinkClosed,

    /// No activation confirmation within the command timeout.
    #[error("Command timeout")]
    CommandTimeout,

    /// No activation termination within the interrogation timeout.
    #[error("Interrogation timeout")]
    InterrogationTimeout,

    /// A command is already waiting for its confirmation on this station.
    #[error("Command already in flight for common address {0}")]
    CommandInFlight(u16),

    /// An interrogation is already running on this station.
    #[error("Interrogation already in flight for common address {0}")]
    InterrogationInFlight(u16),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(Cow<'static, str>),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(Cow<'static, str>),
}

impl Iec104Error {
    /// Create a connection error with a static message.
    #[inline]
    pub const fn connection_static(msg: &'static str) -> Self {
        Self::Connection(Cow::Borrowed(msg))
    }

    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(Cow::Owned(msg.into()))
    }

    /// Create a protocol error with a static message.
    #[inline]
    pub const fn protocol_static(msg: &'static str) -> Self {
        Self::Protocol(Cow::Borrowed(msg))
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(Cow::Owned(msg.into()))
    }

    /// Create an invalid frame error with a static message.
    #[inline]
    pub const fn invalid_frame_static(msg: &'static str) -> Self {
        Self::InvalidFrame(Cow::Borrowed(msg))
    }

    /// Create an invalid ASDU error.
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(Cow::Owned(msg.into()))
    }

    /// Create an invalid ASDU error with a static message.
    #[inline]
    pub const fn invalid_asdu_static(msg: &'static str) -> Self {
        Self::InvalidAsdu(Cow::Borrowed(msg))
    }

    /// Create a configuration error with a static message.
    #[inline]
    pub const fn config_static(msg: &'static str) -> Self {
        Self::Config(Cow::Borrowed(msg))
    }

    /// Whether this error ends the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Io(_)
                | Self::Protocol(_)
                | Self::InvalidFrame(_)
                | Self::SequenceMismatch { .. }
                | Self::AckOutOfWindow { .. }
                | Self::T1Timeout
                | Self::T3Timeout
        )
    }

    /// Cause a controlled station reports back for an ASDU that failed to decode.
    ///
    /// `None` means the ASDU is dropped without a reply.
    pub fn negative_cause(&self) -> Option<Cot> {
        match self {
            Self::UnknownTypeId(_) => Some(Cot::UnknownTypeId),
            Self::UnknownCot(_) => Some(Cot::UnknownCot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Iec104Error::LinkClosed;
        assert_eq!(err.to_string(), "Link closed");

        let err = Iec104Error::UnknownTypeId(255);
        assert_eq!(err.to_string(), "Unknown type ID: 255");

        let err = Iec104Error::SequenceMismatch {
            expected: 10,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Sequence number mismatch: expected 10, got 5"
        );

        let err = Iec104Error::invalid_frame_static("bad start byte");
        assert_eq!(err.to_string(), "Invalid frame: bad start byte");
    }

    #[test]
    fn test_is_fatal() {
        assert!(Iec104Error::T1Timeout.is_fatal());
        assert!(Iec104Error::T3Timeout.is_fatal());
        assert!(Iec104Error::invalid_frame("x").is_fatal());
        assert!(Iec104Error::SequenceMismatch {
            expected: 1,
            actual: 2
        }
        .is_fatal());

        assert!(!Iec104Error::CommandTimeout.is_fatal());
        assert!(!Iec104Error::UnknownTypeId(99).is_fatal());
        assert!(!Iec104Error::invalid_asdu_static("truncated").is_fatal());
        assert!(!Iec104Error::CommandInFlight(1).is_fatal());
    }

    #[test]
    fn test_negative_cause() {
        assert_eq!(
            Iec104Error::UnknownTypeId(99).negative_cause(),
            Some(Cot::UnknownTypeId)
        );
        assert_eq!(
            Iec104Error::UnknownCot(63).negative_cause(),
            Some(Cot::UnknownCot)
        );
        assert_eq!(Iec104Error::invalid_asdu("short").negative_cause(), None);
    }
}
