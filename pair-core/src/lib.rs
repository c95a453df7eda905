//! # pair-core
//!
//! Pure logic for MedPair (no I/O, instant tests).
//!
//! This crate implements the pairing-code rules, the negotiation state
//! machine, candidate bookkeeping, payload serialization, and the merge
//! resolver, all without any network or timer I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relay calls, peer connections, timers) is performed by
//! `pair-client`, which interprets the actions produced by the state machine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidates;
pub mod code;
pub mod merge;
pub mod negotiate;
pub mod payload;

pub use candidates::CandidateTracker;
pub use code::{format_code, generate_code, strip_code, validate_code, CODE_ALPHABET, CODE_LEN};
pub use merge::{merge_records, resolve_import, MergeStrategy};
pub use negotiate::{Action, DiscoveryPath, Event, TransferPhase};
pub use payload::{decode_records, encode_records};
