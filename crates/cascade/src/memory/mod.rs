//! Memory record model and its blob encoding

pub mod codec;
pub mod types;

pub use types::{MemoryRecord, Payload, RecordId, RecordKind, RecordMeta, Tier};
