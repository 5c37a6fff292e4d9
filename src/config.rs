//! Link, master and slave configuration.

use std::time::Duration;

use crate::error::{Iec104Error, Result};
use crate::types::AsduParams;

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default T0 timeout (connection establishment) in seconds.
pub const DEFAULT_T0_TIMEOUT: u64 = 30;

/// Default T1 timeout (send or test APDU acknowledgement) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (acknowledge received I-frames) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (idle test frame) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default K parameter (max unconfirmed I-frames).
pub const DEFAULT_K: u16 = 12;

/// Default W parameter (max unconfirmed receives before sending S-frame).
pub const DEFAULT_W: u16 = 8;

/// Default time to wait for an activation confirmation, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT: u64 = 10;

/// Default time to wait for an interrogation to terminate, in seconds.
pub const DEFAULT_INTERROGATION_TIMEOUT: u64 = 60;

/// Default lifetime of a select in select-before-operate, in seconds.
pub const DEFAULT_SELECTION_TIMEOUT: u64 = 10;

/// Parameters of one link, shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// T1: time to wait for acknowledgement of a sent I-frame or test frame
    pub t1: Duration,
    /// T2: time after which received I-frames are acknowledged
    pub t2: Duration,
    /// T3: idle time before a test frame is sent
    pub t3: Duration,
    /// K: max unconfirmed sent I-frames
    pub k: u16,
    /// W: received I-frames that trigger an acknowledgement
    pub w: u16,
    pub asdu: AsduParams,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            t1: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3: Duration::from_secs(DEFAULT_T3_TIMEOUT),
            k: DEFAULT_K,
            w: DEFAULT_W,
            asdu: AsduParams::default(),
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set T1 timeout.
    pub fn t1_timeout(mut self, timeout: Duration) -> Self {
        self.t1 = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2_timeout(mut self, timeout: Duration) -> Self {
        self.t2 = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3_timeout(mut self, timeout: Duration) -> Self {
        self.t3 = timeout;
        self
    }

    /// Set the K and W window parameters.
    pub fn window(mut self, k: u16, w: u16) -> Self {
        self.k = k;
        self.w = w;
        self
    }

    /// Set the common address width in octets.
    pub fn common_address_size(mut self, size: u8) -> Self {
        self.asdu.common_address_size = size;
        self
    }

    /// Include or omit the originator address octet.
    pub fn originator_address(mut self, present: bool) -> Self {
        self.asdu.originator_address = present;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Iec104Error::config_static("k must be at least 1"));
        }
        if self.w == 0 {
            return Err(Iec104Error::config_static("w must be at least 1"));
        }
        if self.w > self.k {
            return Err(Iec104Error::Config(
                format!("w ({}) must not exceed k ({})", self.w, self.k).into(),
            ));
        }
        // k beyond half the sequence space makes acknowledgements ambiguous
        if self.k >= crate::types::SEQ_MODULUS / 2 {
            return Err(Iec104Error::config_static("k must be below 16384"));
        }
        if self.t2 >= self.t1 {
            return Err(Iec104Error::config_static("t2 must be shorter than t1"));
        }
        if self.t1.is_zero() || self.t3.is_zero() {
            return Err(Iec104Error::config_static("t1 and t3 must be non-zero"));
        }
        self.asdu.validate()
    }
}

/// Controlling station configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Server address (host:port)
    pub address: String,
    /// T0: connection establishment timeout
    pub connect_timeout: Duration,
    pub link: LinkConfig,
    /// Wait for an activation confirmation before failing a command.
    pub command_timeout: Duration,
    /// Wait for activation termination before failing an interrogation.
    pub interrogation_timeout: Duration,
}

impl MasterConfig {
    /// Create a new configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(DEFAULT_T0_TIMEOUT),
            link: LinkConfig::default(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT),
            interrogation_timeout: Duration::from_secs(DEFAULT_INTERROGATION_TIMEOUT),
        }
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Set command confirmation timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set interrogation timeout.
    pub fn interrogation_timeout(mut self, timeout: Duration) -> Self {
        self.interrogation_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() || self.interrogation_timeout.is_zero() {
            return Err(Iec104Error::config_static(
                "command and interrogation timeouts must be non-zero",
            ));
        }
        self.link.validate()
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{DEFAULT_PORT}"))
    }
}

/// Controlled station configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveConfig {
    pub link: LinkConfig,
    /// How long a select stays valid waiting for its execute.
    pub selection_timeout: Duration,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            selection_timeout: Duration::from_secs(DEFAULT_SELECTION_TIMEOUT),
        }
    }
}

impl SlaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Set select-before-operate timeout.
    pub fn selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.selection_timeout.is_zero() {
            return Err(Iec104Error::config_static("selection timeout must be non-zero"));
        }
        self.link.validate()
    }
}
