//! Payload serialization for the transfer channel.
//!
//! The entire record snapshot travels as one JSON message over the reliable
//! ordered channel. No chunking, resumption, or backpressure: a payload that
//! exceeds the transport's practical message-size limit is a boundary
//! failure, not something retried here.

use pair_types::{MedicationRecord, SyncError};

/// Serialize the record snapshot to a single message.
pub fn encode_records(records: &[MedicationRecord]) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec(records).map_err(SyncError::Serialization)
}

/// Deserialize a received message into a record list.
///
/// A parse failure commits nothing; the caller surfaces it as a terminal
/// error without any partial import.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<MedicationRecord>, SyncError> {
    serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pair_types::{DoseInterval, RecordId};

    fn record(name: &str) -> MedicationRecord {
        MedicationRecord {
            id: RecordId::new(),
            name: name.into(),
            pzn: None,
            description: None,
            active_ingredient: None,
            indication: None,
            current_amount: 30.0,
            daily_dosage: 2.0,
            interval: DoseInterval::Daily,
            reminder_threshold_days: 7,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            last_refilled: None,
            manual_info_override: None,
            personal_notes: None,
            intake_log: None,
        }
    }

    #[test]
    fn snapshot_roundtrip() {
        let records = vec![record("Metformin"), record("Lisinopril")];
        let bytes = encode_records(&records).unwrap();
        let back = decode_records(&bytes).unwrap();
        assert_eq!(records, back);
    }

    #[test]
    fn empty_snapshot_roundtrip() {
        let bytes = encode_records(&[]).unwrap();
        assert_eq!(decode_records(&bytes).unwrap(), vec![]);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result = decode_records(b"not json at all");
        assert!(matches!(result, Err(SyncError::Deserialization(_))));
    }

    #[test]
    fn wrong_shape_fails_to_decode() {
        // Valid JSON, wrong shape: an object instead of a list.
        let result = decode_records(b"{\"name\":\"Metformin\"}");
        assert!(matches!(result, Err(SyncError::Deserialization(_))));
    }
}
