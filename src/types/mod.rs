//! IEC 60870-5-104 type definitions.
//!
//! - `Apci` - frame control field and sequence arithmetic
//! - `TypeId`, `Cot` - type identification and cause of transmission
//! - element types - quality descriptors, command qualifiers, counters
//! - `Cp56Time2a`, `Cp24Time2a` - binary time tags
//! - `InformationObject`, `ObjectValue` - typed information objects
//! - `Asdu` - application service data unit codec
//! - `DataPoint` - flattened application view of monitored values

mod apci;
mod asdu;
mod cot;
mod data;
mod element;
mod object;
mod time;
mod type_id;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use data::*;
pub use element::*;
pub use object::*;
pub use time::*;
pub use type_id::*;
