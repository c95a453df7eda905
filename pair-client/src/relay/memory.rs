//! In-memory session relay.
//!
//! Backs tests and single-process rendezvous setups. Shares all state across
//! clones, mirrors the hosted backend's behavior: server-assigned ids and
//! expiry, append-only candidate writes, update notifications per session,
//! and lazy eviction of expired rows.

use super::{RelayError, RelayStore, SessionUpdates};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use pair_types::{SessionDescriptor, SessionId, SessionPatch, SessionStatus, SyncSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Fixed server-side session lifetime.
const DEFAULT_TTL_SECS: i64 = 300;

/// Buffered notifications per subscriber before the relay drops updates
/// (polling covers anything dropped).
const WATCHER_CAPACITY: usize = 16;

struct Row {
    session: SyncSession,
    watchers: Vec<mpsc::Sender<SyncSession>>,
}

#[derive(Default)]
struct MemoryRelayInner {
    rows: HashMap<SessionId, Row>,
    fail_next_create: Option<String>,
    fail_next_update: Option<String>,
}

/// An in-memory [`RelayStore`].
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<Mutex<MemoryRelayInner>>,
    ttl: Duration,
}

impl MemoryRelay {
    /// Create a relay with the default 5-minute session TTL.
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(DEFAULT_TTL_SECS))
    }

    /// Create a relay with a custom session TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryRelayInner::default())),
            ttl,
        }
    }

    /// Cause the next `create_session` to fail with the given error.
    pub fn fail_next_create(&self, error: &str) {
        let mut inner = self.inner.lock().expect("relay lock poisoned");
        inner.fail_next_create = Some(error.to_string());
    }

    /// Cause the next `update_session` to fail with the given error.
    pub fn fail_next_update(&self, error: &str) {
        let mut inner = self.inner.lock().expect("relay lock poisoned");
        inner.fail_next_update = Some(error.to_string());
    }

    /// Number of live (non-expired) sessions.
    pub fn live_sessions(&self) -> usize {
        let now = Utc::now();
        let inner = self.inner.lock().expect("relay lock poisoned");
        inner
            .rows
            .values()
            .filter(|row| !row.session.is_expired(now))
            .count()
    }

    fn notify(row: &mut Row) {
        let snapshot = row.session.clone();
        // Drop subscribers that have gone away or fallen behind.
        row.watchers
            .retain(|tx| tx.try_send(snapshot.clone()).is_ok());
    }

    fn evict_expired(inner: &mut MemoryRelayInner) {
        let now = Utc::now();
        inner.rows.retain(|_, row| !row.session.is_expired(now));
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayStore for MemoryRelay {
    async fn create_session(
        &self,
        code: &str,
        offer: SessionDescriptor,
    ) -> Result<SyncSession, RelayError> {
        let mut inner = self.inner.lock().expect("relay lock poisoned");

        if let Some(error) = inner.fail_next_create.take() {
            return Err(RelayError::Io(error));
        }

        Self::evict_expired(&mut inner);

        let code = code.to_uppercase();
        if inner
            .rows
            .values()
            .any(|row| row.session.pairing_code == code)
        {
            return Err(RelayError::CodeInUse);
        }

        let now = Utc::now();
        let session = SyncSession {
            id: SessionId::new(),
            pairing_code: code,
            offer,
            answer: None,
            ice_candidates: Vec::new(),
            status: SessionStatus::Waiting,
            created_at: now,
            expires_at: now + self.ttl,
        };

        inner.rows.insert(
            session.id,
            Row {
                session: session.clone(),
                watchers: Vec::new(),
            },
        );

        Ok(session)
    }

    async fn find_by_code(&self, code: &str) -> Result<SyncSession, RelayError> {
        let mut inner = self.inner.lock().expect("relay lock poisoned");
        Self::evict_expired(&mut inner);

        let code = code.to_uppercase();
        inner
            .rows
            .values()
            .find(|row| row.session.pairing_code == code)
            .map(|row| row.session.clone())
            .ok_or(RelayError::NotFound)
    }

    async fn update_session(
        &self,
        id: SessionId,
        patch: SessionPatch,
    ) -> Result<SyncSession, RelayError> {
        let mut inner = self.inner.lock().expect("relay lock poisoned");

        if let Some(error) = inner.fail_next_update.take() {
            return Err(RelayError::Io(error));
        }

        Self::evict_expired(&mut inner);

        let row = inner.rows.get_mut(&id).ok_or(RelayError::NotFound)?;

        if let Some(answer) = patch.answer {
            row.session.answer = Some(answer);
        }
        if let Some(status) = patch.status {
            row.session.status = status;
        }
        row.session.ice_candidates.extend(patch.append_candidates);

        Self::notify(row);
        Ok(row.session.clone())
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().expect("relay lock poisoned");
        inner.rows.remove(&id).ok_or(RelayError::NotFound)?;
        Ok(())
    }

    async fn subscribe(&self, id: SessionId) -> Result<SessionUpdates, RelayError> {
        let mut inner = self.inner.lock().expect("relay lock poisoned");
        let row = inner.rows.get_mut(&id).ok_or(RelayError::NotFound)?;

        let (tx, rx) = mpsc::channel(WATCHER_CAPACITY);
        row.watchers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pair_types::IceCandidate;

    fn offer() -> SessionDescriptor {
        SessionDescriptor::offer("v=0 test-offer")
    }

    #[tokio::test]
    async fn create_assigns_expiry_and_waiting_status() {
        let relay = MemoryRelay::new();
        let session = relay.create_session("K7X9M2", offer()).await.unwrap();

        assert_eq!(session.pairing_code, "K7X9M2");
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.expires_at > session.created_at);
        assert!(session.answer.is_none());
    }

    #[tokio::test]
    async fn find_is_case_insensitive() {
        let relay = MemoryRelay::new();
        relay.create_session("K7X9M2", offer()).await.unwrap();

        let found = relay.find_by_code("k7x9m2").await.unwrap();
        assert_eq!(found.pairing_code, "K7X9M2");
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let relay = MemoryRelay::new();
        let result = relay.find_by_code("ABCDEF").await;
        assert!(matches!(result, Err(RelayError::NotFound)));
    }

    #[tokio::test]
    async fn expired_sessions_are_not_found() {
        let relay = MemoryRelay::with_ttl(Duration::seconds(0));
        relay.create_session("K7X9M2", offer()).await.unwrap();

        let result = relay.find_by_code("K7X9M2").await;
        assert!(matches!(result, Err(RelayError::NotFound)));
        assert_eq!(relay.live_sessions(), 0);
    }

    #[tokio::test]
    async fn duplicate_live_code_is_rejected() {
        let relay = MemoryRelay::new();
        relay.create_session("K7X9M2", offer()).await.unwrap();

        let result = relay.create_session("K7X9M2", offer()).await;
        assert!(matches!(result, Err(RelayError::CodeInUse)));
    }

    #[tokio::test]
    async fn update_appends_candidates_instead_of_overwriting() {
        let relay = MemoryRelay::new();
        let session = relay.create_session("K7X9M2", offer()).await.unwrap();

        relay
            .update_session(
                session.id,
                SessionPatch::candidates(vec![IceCandidate::new("a"), IceCandidate::new("b")]),
            )
            .await
            .unwrap();
        let updated = relay
            .update_session(
                session.id,
                SessionPatch::candidates(vec![IceCandidate::new("c")]),
            )
            .await
            .unwrap();

        let lines: Vec<_> = updated
            .ice_candidates
            .iter()
            .map(|c| c.candidate.as_str())
            .collect();
        assert_eq!(lines, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn answer_patch_sets_connected_status() {
        let relay = MemoryRelay::new();
        let session = relay.create_session("K7X9M2", offer()).await.unwrap();

        let updated = relay
            .update_session(
                session.id,
                SessionPatch::answer(SessionDescriptor::answer("v=0 test-answer")),
            )
            .await
            .unwrap();

        assert!(updated.answer.is_some());
        assert_eq!(updated.status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let relay = MemoryRelay::new();
        let session = relay.create_session("K7X9M2", offer()).await.unwrap();
        let mut updates = relay.subscribe(session.id).await.unwrap();

        relay
            .update_session(
                session.id,
                SessionPatch::candidates(vec![IceCandidate::new("a")]),
            )
            .await
            .unwrap();

        let snapshot = updates.recv().await.unwrap();
        assert_eq!(snapshot.ice_candidates.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let relay = MemoryRelay::new();
        let session = relay.create_session("K7X9M2", offer()).await.unwrap();

        relay.delete_session(session.id).await.unwrap();

        assert!(matches!(
            relay.find_by_code("K7X9M2").await,
            Err(RelayError::NotFound)
        ));
        assert!(matches!(
            relay.delete_session(session.id).await,
            Err(RelayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn forced_failures_fire_once() {
        let relay = MemoryRelay::new();
        relay.fail_next_create("backend down");

        assert!(matches!(
            relay.create_session("K7X9M2", offer()).await,
            Err(RelayError::Io(_))
        ));
        // Next call succeeds.
        relay.create_session("K7X9M2", offer()).await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_state() {
        let relay = MemoryRelay::new();
        let clone = relay.clone();

        relay.create_session("K7X9M2", offer()).await.unwrap();
        assert!(clone.find_by_code("K7X9M2").await.is_ok());
    }
}
