//! Negotiation state machine for MedPair.
//!
//! This module provides a pure, side-effect-free state machine for one
//! transfer session. The machine takes events as input and produces a new
//! phase plus a list of actions to execute.
//!
//! The actual I/O (relay calls, peer connection, timers) is performed by
//! pair-client, not by this module. This enables instant unit testing
//! without network mocks.
//!
//! Two invariants live here structurally rather than as ad hoc flags:
//!
//! - **Answer idempotency**: `AnswerObserved` only produces `ApplyAnswer`
//!   from the `Waiting` phase. The transition to `Connecting` *is* the
//!   "already applied" guard; a second observation (the push and poll paths
//!   may both see the same update) lands in `Connecting` or later and is a
//!   no-op.
//! - **Unconditional cleanup**: every transition into `Error`, `Completed`
//!   or `Idle` emits `Release`, so owned resources are freed on every exit
//!   path.

use std::fmt;

/// Which redundant discovery path observed a relay update.
///
/// The realtime push subscription and the fixed-interval poll watch the same
/// session; logging which one resolved each transition makes flaky realtime
/// delivery diagnosable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPath {
    /// The realtime change-notification subscription.
    Push,
    /// The fixed-interval polling fallback.
    Poll,
}

impl fmt::Display for DiscoveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryPath::Push => write!(f, "push"),
            DiscoveryPath::Poll => write!(f, "poll"),
        }
    }
}

/// Transfer phase state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPhase {
    /// No transfer in progress.
    Idle,
    /// Sender is creating local resources and the pairing code.
    GeneratingCode,
    /// Sender has published the session and waits for an answer.
    Waiting,
    /// Answer applied (sender) or offer applied (receiver); the peer
    /// connection is being established.
    Connecting,
    /// The peer connection reported connected.
    Connected,
    /// The data channel is moving the payload.
    Transferring,
    /// The payload was delivered and the session cleaned up.
    Completed,
    /// Terminal failure.
    Error {
        /// Human-readable message surfaced to the UI.
        message: String,
    },
}

impl TransferPhase {
    /// Create a new state machine in the Idle phase.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new phase plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (pair-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Starting a role. The orchestrator guarantees prior resources
            // are torn down before feeding these.
            (Self::Idle, Event::SenderStart) => (Self::GeneratingCode, vec![]),
            (Self::Idle, Event::ReceiverStart) => (Self::Connecting, vec![]),

            // Sender: session row inserted, offer + candidate batch published.
            (Self::GeneratingCode, Event::SessionPublished) => {
                (Self::Waiting, vec![Action::StartCountdown])
            }

            // Sender: first observation of the answer wins; later ones fall
            // through to the catch-all no-op below.
            (Self::Waiting, Event::AnswerObserved { via }) => (
                Self::Connecting,
                vec![Action::ApplyAnswer { via }, Action::ApplyNewCandidates],
            ),

            // New remote candidates can only be applied once a remote
            // description is set, i.e. from Connecting onward.
            (Self::Connecting, Event::CandidatesObserved { .. }) => {
                (Self::Connecting, vec![Action::ApplyNewCandidates])
            }
            (Self::Connected, Event::CandidatesObserved { .. }) => {
                (Self::Connected, vec![Action::ApplyNewCandidates])
            }

            // Transport-level connection established.
            (Self::Waiting, Event::TransportConnected) => (Self::Connected, vec![]),
            (Self::Connecting, Event::TransportConnected) => (Self::Connected, vec![]),

            // Sender: the reliable channel opened, ship the snapshot.
            (Self::Waiting, Event::ChannelOpened)
            | (Self::Connecting, Event::ChannelOpened)
            | (Self::Connected, Event::ChannelOpened) => {
                (Self::Transferring, vec![Action::SendPayload])
            }

            // Receiver: one message carries the whole payload.
            (Self::Connecting, Event::MessageReceived)
            | (Self::Connected, Event::MessageReceived) => {
                (Self::Transferring, vec![Action::DecodePayload])
            }

            // Payload delivered; both sides delete the relay session so the
            // code cannot be replayed.
            (Self::Transferring, Event::TransferFinished) => (
                Self::Completed,
                vec![Action::DeleteSession, Action::Release],
            ),

            // Countdown reached zero without a connection.
            (Self::GeneratingCode, Event::Expired)
            | (Self::Waiting, Event::Expired)
            | (Self::Connecting, Event::Expired) => (
                Self::Error {
                    message: "pairing code expired".into(),
                },
                vec![Action::Release],
            ),

            // Terminal phases ignore everything except cancel.
            (Self::Completed, Event::Cancelled) | (Self::Error { .. }, Event::Cancelled) => {
                (Self::Idle, vec![Action::Release])
            }
            (phase @ Self::Completed, _) | (phase @ Self::Error { .. }, _) => (phase, vec![]),

            // Any non-terminal failure is terminal for the session.
            (_, Event::Failed { message }) => {
                (Self::Error { message }, vec![Action::Release])
            }

            // Cancel is callable from any phase.
            (_, Event::Cancelled) => (Self::Idle, vec![Action::Release]),

            // Invalid or duplicate transitions - stay in current phase.
            (phase, _) => (phase, vec![]),
        }
    }

    /// Whether the session is in a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error { .. })
    }

    /// Whether the peer connection reported connected (or beyond).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Transferring | Self::Completed)
    }

    /// The coarse status label for the UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::GeneratingCode => "generating-code",
            Self::Waiting => "waiting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Transferring => "transferring",
            Self::Completed => "completed",
            Self::Error { .. } => "error",
        }
    }
}

impl Default for TransferPhase {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur during one transfer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `start_sender` was called.
    SenderStart,
    /// `start_receiver` was called with a locally-valid code.
    ReceiverStart,
    /// The sender's session row (code, offer, candidate batch) is on the relay.
    SessionPublished,
    /// A discovery path observed an answer on the session.
    AnswerObserved {
        /// Which path saw it first.
        via: DiscoveryPath,
    },
    /// A discovery path observed growth in the candidate list.
    CandidatesObserved {
        /// Total list length at observation time.
        total: usize,
        /// Which path saw it.
        via: DiscoveryPath,
    },
    /// The peer transport reported a connected state.
    TransportConnected,
    /// The reliable ordered channel opened (sender side).
    ChannelOpened,
    /// The single payload message arrived (receiver side).
    MessageReceived,
    /// The payload was sent/delivered and the grace delay elapsed.
    TransferFinished,
    /// The sender countdown reached zero.
    Expired,
    /// A relay, transport, or parse failure.
    Failed {
        /// Human-readable message surfaced to the UI.
        message: String,
    },
    /// `cancel` was called.
    Cancelled,
}

/// Actions to be executed by pair-client.
///
/// These are instructions, not side effects. The client interprets them and
/// performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Set the observed answer as the remote description.
    ApplyAnswer {
        /// Discovery path that won the race, for logging.
        via: DiscoveryPath,
    },
    /// Apply the not-yet-seen suffix of the candidate list via the tracker.
    ApplyNewCandidates,
    /// Start the expiry countdown from the session's `expires_at`.
    StartCountdown,
    /// Serialize the record snapshot and send it over the channel.
    SendPayload,
    /// Deserialize the received message and hand records to the callback.
    DecodePayload,
    /// Delete the relay session (best effort; failure is logged, non-fatal).
    DeleteSession,
    /// Close channel and connection, clear timers, unsubscribe.
    Release,
}
