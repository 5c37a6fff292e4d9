//! # iec104_engine
//!
//! IEC 60870-5-104 protocol engine for Rust: both ends of the link.
//!
//! The crate implements the telecontrol protocol used in power systems and
//! SCADA applications, from the APCI framer up to the application roles.
//!
//! ## Features
//!
//! - **Session**: one supervisory task per connection handling the k/w
//!   window and the T1, T2 and T3 timers.
//! - **Master**: commands, setpoints and interrogations with per-station
//!   correlation of confirmations, plus an event channel for monitored data
//! - **Slave**: request validation, select-before-operate and interrogation
//!   replies over a pluggable [`StationHandler`]
//! - **Type Safe**: typed information objects for every supported TypeID
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use iec104_engine::{Command, Iec104Master, MasterConfig, Qoi};
//!
//! #[tokio::main]
//! async fn main() -> iec104_engine::Result<()> {
//!     let mut master = Iec104Master::connect(MasterConfig::new("192.168.1.100:2404")).await?;
//!     let mut events = master.subscribe().expect("first subscriber");
//!     master.start_dt().await?;
//!
//!     let outcome = master.general_interrogation(1, Qoi::STATION).await?;
//!     println!("{} points", outcome.points().len());
//!
//!     master.select_and_execute(1, 6001, Command::double(true)).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! IEC 60870-5-104 uses TCP/IP for communication (default port 2404).
//! The protocol defines three frame types:
//!
//! - **I-frame**: Information transfer (contains ASDU)
//! - **S-frame**: Supervisory (acknowledgment)
//! - **U-frame**: Unnumbered (control: STARTDT, STOPDT, TESTFR)
//!
//! ### APDU Structure
//!
//! ```text
//! APCI (6 bytes):
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | Control Field (4 bytes)           |
//! +--------+--------+--------+--------+--------+--------+
//! ASDU (up to 249 bytes):
//! +------+-----+-----+-----+-------+----------------------+
//! | Type | VSQ | COT | OA? | CA    | Information objects  |
//! +------+-----+-----+-----+-------+----------------------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod config;
pub mod error;
pub mod master;
pub mod parser;
pub mod session;
pub mod slave;
pub mod station;
pub mod types;

// Re-export main types
pub use codec::{Apdu, Iec104Codec};
pub use config::{LinkConfig, MasterConfig, SlaveConfig, DEFAULT_PORT};
pub use error::{Iec104Error, Result};
pub use master::{Command, Confirmation, Iec104Event, Iec104Master, InterrogationOutcome};
pub use parser::parse_asdu;
pub use session::{ConnectionState, LinkRole, SessionEvent, SessionHandle};
pub use slave::Iec104Slave;
pub use station::{
    CommandBinding, CommandPoint, ExecuteOutcome, ExecutedCommand, MemoryStation, PointGroup,
    StationHandler,
};
pub use types::*;
