//! Blob encoding for warm and cold records

use bytes::Bytes;

use super::types::MemoryRecord;
use crate::error::Result;

pub fn encode(record: &MemoryRecord) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(record)?))
}

pub fn decode(bytes: &[u8]) -> Result<MemoryRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::memory::{Payload, RecordId, RecordKind};

    #[test]
    fn test_consolidated_record_survives_encoding() {
        let mut record = MemoryRecord::new(
            RecordKind::Summary,
            Payload::new("summary").with_embedding(vec![0.5, -0.25]),
        )
        .with_conversation("s1");
        record.consolidation_generation = 2;
        record.source_ids = vec![RecordId::new(), RecordId::new()];
        record.lineage = vec![RecordId::new(), RecordId::new(), RecordId::new()];

        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_garbage() {
        let result = decode(b"\x00\x01 not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
