//! Record types for the Cascade cache
//!
//! Defines the memory record stored in every tier, its identifier, the tier
//! enum and the metadata projection the index keeps for background scans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique, immutable identifier of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Key under which the record is stored in a blob store
    pub fn blob_key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// What produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Raw conversational turn
    Turn,
    /// Result of a tool invocation
    ToolOutput,
    /// Free-form note, often embedding-bearing
    Note,
    /// Output of consolidation
    Summary,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Turn => "turn",
            RecordKind::ToolOutput => "tool_output",
            RecordKind::Note => "note",
            RecordKind::Summary => "summary",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque record content plus an optional embedding
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Payload {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Content interpreted as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Bytes counted against tier budgets
    pub fn size_bytes(&self) -> u64 {
        let embedding = self.embedding.as_ref().map_or(0, |e| e.len() * 4);
        (self.content.len() + embedding) as u64
    }
}

/// Storage tier a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process, bounded by entry count and byte budget
    Hot,
    /// Blob store, larger budget, higher latency
    Warm,
    /// Blob store, unbounded, consolidation-eligible
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    /// Position in `Tier::ALL`; lower is warmer
    pub fn index(&self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Warm => 1,
            Tier::Cold => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single memory record stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub payload: Payload,
    pub kind: RecordKind,
    /// Thread/session key used to group records for consolidation
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Never decremented
    pub access_count: u32,
    pub size_bytes: u64,
    /// 0 for raw records, max(source generations) + 1 for summaries
    pub consolidation_generation: u32,
    /// Ids this record replaced, in chronological order
    #[serde(default)]
    pub source_ids: Vec<RecordId>,
    /// Generation-0 ancestors, flattened across every consolidation
    #[serde(default)]
    pub lineage: Vec<RecordId>,
}

impl MemoryRecord {
    /// Create a raw record timestamped with the wall clock
    pub fn new(kind: RecordKind, payload: Payload) -> Self {
        Self::new_at(kind, payload, Utc::now())
    }

    /// Create a raw record with an explicit creation time
    pub fn new_at(kind: RecordKind, payload: Payload, now: DateTime<Utc>) -> Self {
        let size_bytes = payload.size_bytes();
        Self {
            id: RecordId::new(),
            payload,
            kind,
            conversation_id: None,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            size_bytes,
            consolidation_generation: 0,
            source_ids: Vec::new(),
            lineage: Vec::new(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Record an access at `now`
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Recompute `size_bytes` after the payload changed
    pub fn refresh_size(&mut self) {
        self.size_bytes = self.payload.size_bytes();
    }

    pub fn is_consolidated(&self) -> bool {
        self.consolidation_generation > 0
    }

    /// Generation-0 ids this record stands for
    pub fn ancestry(&self) -> Vec<RecordId> {
        if self.is_consolidated() {
            self.lineage.clone()
        } else {
            vec![self.id]
        }
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            id: self.id,
            kind: self.kind,
            conversation_id: self.conversation_id.clone(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            size_bytes: self.size_bytes,
            generation: self.consolidation_generation,
        }
    }

    /// Overwrite the access metadata with what the index knows
    pub(crate) fn apply_meta(&mut self, meta: &RecordMeta) {
        self.last_accessed_at = meta.last_accessed_at;
        self.access_count = meta.access_count;
    }
}

/// Metadata kept in the index so scans never touch blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: RecordId,
    pub kind: RecordKind,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    pub size_bytes: u64,
    pub generation: u32,
}

impl RecordMeta {
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
