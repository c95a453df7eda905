//! # pair-types
//!
//! Shared types for the MedPair device-to-device transfer protocol.
//!
//! This crate provides the foundational types used across all MedPair crates:
//! - [`SessionId`], [`RecordId`] - Identity types
//! - [`MedicationRecord`] - The transferred payload (opaque to the sync core)
//! - [`SyncSession`] - The relay-stored session row brokering offer/answer exchange
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod records;
mod session;

pub use error::SyncError;
pub use ids::{RecordId, SessionId};
pub use records::{DoseInterval, IntakeLog, MedicationRecord};
pub use session::{
    DescriptorKind, IceCandidate, SessionDescriptor, SessionPatch, SessionStatus, SyncSession,
};
