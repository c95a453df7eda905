//! # pair-client
//!
//! Async orchestration for MedPair device-to-device transfer.
//!
//! This crate drives the pure state machine from `pair-core` against two
//! pluggable collaborators:
//!
//! - a [`RelayStore`]: the external session store brokering offer/answer and
//!   candidate exchange (any key-value backend with change notifications),
//! - a [`PeerTransport`]: the interactive connectivity transport providing
//!   offer/answer descriptors, candidate gathering, and a reliable ordered
//!   message channel.
//!
//! ```text
//! UI → SyncHandle → RelayStore / PeerTransport → network
//!          ↓
//!     pair-core (pure state machine)
//! ```
//!
//! The transferred payload travels directly between the two devices; it is
//! never written to the relay.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod peer;
pub mod relay;
mod session;

pub use peer::{ConnectionEvent, DataChannel, PeerConnection, PeerError, PeerTransport};
pub use peer::{MockConnection, MockPeerTransport};
pub use relay::{MemoryRelay, RelayError, RelayStore, SessionUpdates};
pub use session::{SyncHandle, TransferSnapshot};
