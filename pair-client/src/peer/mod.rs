//! Peer transport abstraction for MedPair.
//!
//! This seam models a standard interactive-connectivity transport:
//! offer/answer session descriptors, candidate discovery with a
//! gathering-complete signal, connection-state events, and a reliable
//! ordered message channel. STUN-only is assumed - peers behind
//! incompatible NAT topologies simply fail to connect, which surfaces as a
//! [`ConnectionEvent::Failed`].
//!
//! Candidate gathering is exposed as one batch
//! ([`PeerConnection::gather_candidates`] resolves when local discovery
//! completes) rather than per-candidate callbacks; publishing candidates
//! one relay round-trip at a time was the dominant source of flakiness in
//! the app this protocol grew out of.

mod mock;

pub use mock::{MockChannel, MockConnection, MockPeerTransport};

use async_trait::async_trait;
use pair_types::{IceCandidate, SessionDescriptor};
use thiserror::Error;

/// Peer transport errors.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Connection establishment failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation was attempted in the wrong negotiation state.
    #[error("invalid negotiation state: {0}")]
    InvalidState(String),

    /// The data channel closed before the operation completed.
    #[error("channel closed")]
    ChannelClosed,

    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,
}

/// Connection-state changes surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The peer connection reached a connected state.
    Connected,
    /// The peer connection failed or was lost.
    Failed {
        /// Transport-provided reason.
        reason: String,
    },
}

/// Factory for peer connections; one connection per transfer session.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// The connection type this transport produces.
    type Conn: PeerConnection;

    /// Create a fresh, unconnected peer connection.
    async fn new_connection(&self) -> Result<Self::Conn, PeerError>;
}

/// One peer connection in the making.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// The data channel type carried by this connection.
    type Channel: DataChannel;

    /// Create the local offer (sender role).
    async fn create_offer(&self) -> Result<SessionDescriptor, PeerError>;

    /// Create the local answer; requires a remote offer to be set first
    /// (receiver role).
    async fn create_answer(&self) -> Result<SessionDescriptor, PeerError>;

    /// Apply the remote half of the handshake.
    async fn set_remote_description(&self, desc: SessionDescriptor) -> Result<(), PeerError>;

    /// Apply one remote candidate; requires a remote description.
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Collect all locally-discovered candidates; resolves when local
    /// gathering completes, with the full batch.
    async fn gather_candidates(&self) -> Result<Vec<IceCandidate>, PeerError>;

    /// Register a reliable ordered channel (sender role; only the sender
    /// creates the channel).
    async fn create_channel(&self, label: &str) -> Result<Self::Channel, PeerError>;

    /// Wait for the channel the remote side registered (receiver role).
    async fn incoming_channel(&self) -> Result<Self::Channel, PeerError>;

    /// Next connection-state event; `None` once the connection is closed.
    async fn next_event(&self) -> Option<ConnectionEvent>;

    /// Tear the connection down, releasing the channel with it.
    async fn close(&self);
}

/// A reliable ordered message channel between the two peers.
#[async_trait]
pub trait DataChannel: Send + Sync + 'static {
    /// Resolve once the channel is open for sending.
    async fn ready(&self) -> Result<(), PeerError>;

    /// Send one message.
    async fn send(&self, data: &[u8]) -> Result<(), PeerError>;

    /// Receive one message.
    async fn recv(&self) -> Result<Vec<u8>, PeerError>;

    /// Close the channel.
    async fn close(&self);
}
