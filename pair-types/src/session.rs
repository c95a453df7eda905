//! The relay-stored transfer session.
//!
//! A [`SyncSession`] is the one cross-device shared mutable resource: the
//! sender inserts it (code + offer), the receiver writes its answer, and both
//! sides append connectivity candidates. The payload itself never touches the
//! relay.

use crate::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the connection handshake a descriptor carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    /// Created by the sender.
    Offer,
    /// Created by the receiver in response to an offer.
    Answer,
}

/// An opaque session description (one half of the offer/answer handshake).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: DescriptorKind,
    /// The transport-defined description text.
    pub sdp: String,
}

impl SessionDescriptor {
    /// Create an offer descriptor.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer descriptor.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A discovered network path descriptor used to establish the direct
/// peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The transport-defined candidate line.
    pub candidate: String,
    /// Media stream identification tag, if the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index, if the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate from a bare candidate line.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Status label stored on the relay row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Sender has published the offer and is waiting for an answer.
    Waiting,
    /// Receiver has published its answer.
    Connected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// A transfer session as stored on the relay.
///
/// Invariant: exactly one offer, at most one answer. The candidate list is
/// append-only; consumers track how many entries they have already applied
/// (see `pair-core`'s candidate tracker) rather than relying on the list
/// itself to deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Relay-assigned identifier.
    pub id: SessionId,
    /// The human-typeable pairing code for this session.
    pub pairing_code: String,
    /// The sender's offer.
    pub offer: SessionDescriptor,
    /// The receiver's answer, once published.
    pub answer: Option<SessionDescriptor>,
    /// Accumulated candidates from both sides. Never removed, only appended.
    pub ice_candidates: Vec<IceCandidate>,
    /// Current status label.
    pub status: SessionStatus,
    /// When the session was inserted.
    pub created_at: DateTime<Utc>,
    /// When the session stops being discoverable. Relay-assigned.
    pub expires_at: DateTime<Utc>,
}

impl SyncSession {
    /// Whether the session has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A partial update to a relay session.
///
/// Candidates are appended, never overwritten, so one side's update cannot
/// erase the other's entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    /// Set the answer descriptor.
    pub answer: Option<SessionDescriptor>,
    /// Set the status label.
    pub status: Option<SessionStatus>,
    /// Candidates to append to the shared list.
    pub append_candidates: Vec<IceCandidate>,
}

impl SessionPatch {
    /// A patch publishing the receiver's answer and marking the session connected.
    pub fn answer(answer: SessionDescriptor) -> Self {
        Self {
            answer: Some(answer),
            status: Some(SessionStatus::Connected),
            append_candidates: Vec::new(),
        }
    }

    /// A patch appending a batch of candidates.
    pub fn candidates(candidates: Vec<IceCandidate>) -> Self {
        Self {
            answer: None,
            status: None,
            append_candidates: candidates,
        }
    }

    /// Append candidates to an existing patch.
    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.append_candidates.extend(candidates);
        self
    }
}
