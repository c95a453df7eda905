//! The medication record payload.
//!
//! These types are what travels over the data channel. The sync core treats
//! them as opaque serializable values: it must preserve round-trip fidelity
//! (including date fields) but never interprets medical semantics. Field
//! names on the wire use the camelCase/kebab-case shape of the app's export
//! format.

use crate::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How often a medication is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoseInterval {
    /// Once per day.
    #[serde(rename = "daily")]
    Daily,
    /// Twice per day.
    #[serde(rename = "twice-daily")]
    TwiceDaily,
    /// Three times per day.
    #[serde(rename = "three-times-daily")]
    ThreeTimesDaily,
    /// Once per week.
    #[serde(rename = "weekly")]
    Weekly,
    /// Taken only when needed; consumption is tracked via the intake log.
    #[serde(rename = "as-needed")]
    AsNeeded,
}

/// One entry in the intake history of an as-needed medication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeLog {
    /// When the dose was taken.
    pub date: DateTime<Utc>,
    /// How many units were taken.
    pub amount: f64,
    /// Optional free-text note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A single medication record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRecord {
    /// Record identifier, unique within one device's local store.
    pub id: RecordId,
    /// Display name of the medication.
    pub name: String,
    /// Optional pharmacy central number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pzn: Option<String>,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional active ingredient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_ingredient: Option<String>,
    /// Optional indication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indication: Option<String>,
    /// Units currently on hand.
    pub current_amount: f64,
    /// Units consumed per day (per intake for as-needed).
    pub daily_dosage: f64,
    /// Dosing interval.
    pub interval: DoseInterval,
    /// Days of remaining supply below which a refill reminder fires.
    pub reminder_threshold_days: u32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the supply was last refilled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refilled: Option<DateTime<Utc>>,
    /// Whether auto-filled drug info was manually overridden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_info_override: Option<bool>,
    /// Personal notes, never auto-filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_notes: Option<String>,
    /// Intake history for as-needed medications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intake_log: Option<Vec<IntakeLog>>,
}
