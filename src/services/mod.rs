//! Services - the per-cycle pipeline
//!
//! - `acquisition` - Reader poll into a `RawRead` (select, auth, block read, release)
//! - `dedup` - Suppression of repeat reads of the same tag
//! - `publisher` - Normalize, dedup and hand events to the transport
//! - `node` - The polling loop tying it together

pub mod acquisition;
pub mod dedup;
pub mod node;
pub mod publisher;

pub use acquisition::TagAcquisition;
pub use dedup::{should_suppress, DedupState, SUPPRESSION_WINDOW_MS};
pub use node::{CycleOutcome, ReaderNode};
pub use publisher::{PublishOutcome, ReadOutcome, TagPublisher};
