//! Domain models - tag reads and published events
//!
//! - `types` - raw reader data (UID, SAK classification, keys, `RawRead`)
//! - `event` - `TagEvent`, normalization and the wire schema

pub mod event;
pub mod types;

pub use event::{normalize, TagEvent, TagKind};
pub use types::{CardSerial, MifareKey, PiccType, RawRead, Uid};
