//! Merge resolution for imported records.
//!
//! When a receiver already has local records, the incoming list is reconciled
//! with one of two strategies. The duplicate key is (name lowercased, daily
//! dosage, interval). Known limitation: two distinct medications sharing all
//! three (differing only in notes or other free-text fields) are conflated;
//! this matches the app's established behavior and is deliberately not
//! refined here.

use pair_types::{DoseInterval, MedicationRecord, RecordId};

/// The two reconciliation strategies for incoming records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Keep existing records, append incoming records that are not
    /// duplicates, with fresh local ids. The recommended default.
    Merge,
    /// The incoming list wholly replaces the local list, verbatim.
    Replace,
}

fn interval_key(interval: DoseInterval) -> &'static str {
    match interval {
        DoseInterval::Daily => "daily",
        DoseInterval::TwiceDaily => "twice-daily",
        DoseInterval::ThreeTimesDaily => "three-times-daily",
        DoseInterval::Weekly => "weekly",
        DoseInterval::AsNeeded => "as-needed",
    }
}

fn dedup_key(record: &MedicationRecord) -> String {
    format!(
        "{}-{}-{}",
        record.name.to_lowercase(),
        record.daily_dosage,
        interval_key(record.interval)
    )
}

/// Reconcile incoming records against the existing list.
///
/// `Replace` returns the incoming list untouched (ids included). `Merge`
/// drops incoming records whose duplicate key already exists locally and
/// appends the survivors with fresh [`RecordId`]s so they cannot collide
/// with existing identifiers. Date fields pass through as real date values.
pub fn merge_records(
    existing: &[MedicationRecord],
    incoming: Vec<MedicationRecord>,
    strategy: MergeStrategy,
) -> Vec<MedicationRecord> {
    if strategy == MergeStrategy::Replace {
        return incoming;
    }

    let existing_keys: std::collections::HashSet<String> =
        existing.iter().map(dedup_key).collect();

    let mut resolved: Vec<MedicationRecord> = existing.to_vec();
    resolved.extend(
        incoming
            .into_iter()
            .filter(|record| !existing_keys.contains(&dedup_key(record)))
            .map(|mut record| {
                record.id = RecordId::new();
                record
            }),
    );
    resolved
}

/// Resolve an import, honoring the empty-store shortcut.
///
/// If the local store is empty there is nothing to merge against and the
/// incoming list is imported directly, without a strategy prompt; `strategy`
/// is only consulted when local records exist.
pub fn resolve_import(
    existing: &[MedicationRecord],
    incoming: Vec<MedicationRecord>,
    strategy: MergeStrategy,
) -> Vec<MedicationRecord> {
    if existing.is_empty() {
        return incoming;
    }
    merge_records(existing, incoming, strategy)
}
