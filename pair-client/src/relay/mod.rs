//! Session relay abstraction for MedPair.
//!
//! The relay is a keyed store of [`SyncSession`] rows with change
//! notifications. The app's hosted backend, a rendezvous server, or the
//! bundled [`MemoryRelay`] all satisfy the same contract; the orchestrator
//! only depends on this trait.
//!
//! # Failure semantics
//!
//! Any call may fail (network, not-found, expired) and surfaces as a typed
//! [`RelayError`]. No retries happen at this layer - the dual push/poll
//! discovery in the orchestrator is a redundancy mechanism, not a retry
//! policy.

mod memory;

pub use memory::MemoryRelay;

use async_trait::async_trait;
use pair_types::{SessionDescriptor, SessionId, SessionPatch, SyncSession};
use thiserror::Error;
use tokio::sync::mpsc;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No live session matches (not found, or found but expired).
    #[error("session not found or expired")]
    NotFound,

    /// A live session already uses this pairing code.
    #[error("pairing code already in use")]
    CodeInUse,

    /// Transport-level failure talking to the relay.
    #[error("relay i/o error: {0}")]
    Io(String),
}

/// A stream of session snapshots pushed by the relay on every update.
///
/// Delivery is best-effort: the subscription may be silently unreliable or
/// close early, which is why consumers always pair it with polling.
pub type SessionUpdates = mpsc::Receiver<SyncSession>;

/// The session relay contract.
///
/// Writers must append to the candidate list, never overwrite it, so one
/// side's update cannot erase the other's entries ([`SessionPatch`] encodes
/// this as `append_candidates`).
#[async_trait]
pub trait RelayStore: Send + Sync + 'static {
    /// Insert a new session with status `waiting` and a relay-assigned expiry.
    async fn create_session(
        &self,
        code: &str,
        offer: SessionDescriptor,
    ) -> Result<SyncSession, RelayError>;

    /// Look up the live session for a pairing code.
    async fn find_by_code(&self, code: &str) -> Result<SyncSession, RelayError>;

    /// Apply a partial update and return the updated row.
    async fn update_session(
        &self,
        id: SessionId,
        patch: SessionPatch,
    ) -> Result<SyncSession, RelayError>;

    /// Delete a session row.
    async fn delete_session(&self, id: SessionId) -> Result<(), RelayError>;

    /// Subscribe to update notifications for one session.
    async fn subscribe(&self, id: SessionId) -> Result<SessionUpdates, RelayError>;
}
