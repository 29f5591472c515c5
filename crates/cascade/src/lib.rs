//! Cascade - Tiered memory cache for LLM agents
//!
//! This crate keeps recent agent memory (conversation turns, tool output,
//! notes) in an in-process hot tier, ages cooler records into warm and cold
//! blob storage, and periodically collapses old, low-value records into
//! episodic summaries without losing data on failure.

pub mod adapters;
pub mod cache;
pub mod clock;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod memory;
pub mod storage;
pub mod testing;

pub use cache::{CacheAdapters, CacheStats, MemoryCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use memory::{MemoryRecord, Payload, RecordId, RecordKind, Tier};
