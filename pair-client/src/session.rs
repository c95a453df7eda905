//! Transfer orchestration.
//!
//! [`SyncHandle`] drives the pure state machine from `pair-core` against a
//! [`RelayStore`] and a [`PeerTransport`]. It owns the per-session resources
//! (peer connection, background tasks) and publishes a [`TransferSnapshot`]
//! through a watch channel for the UI.
//!
//! Relay updates reach the orchestrator on two redundant paths: the relay's
//! push subscription and a fixed-interval poll. Both feed the same event
//! stream; the state machine and the candidate tracker make the race
//! harmless, and each applied transition logs which path delivered it.

use crate::peer::{ConnectionEvent, DataChannel, PeerConnection, PeerTransport};
use crate::relay::{RelayError, RelayStore};
use chrono::Utc;
use pair_core::{
    decode_records, encode_records, generate_code, strip_code, validate_code, Action,
    CandidateTracker, DiscoveryPath, Event, TransferPhase,
};
use pair_types::{
    IceCandidate, MedicationRecord, SessionId, SessionPatch, SyncError, SyncSession,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Polling fallback interval for relay updates.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Expiry countdown resolution.
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Delay between tearing down a previous session and starting the next, so
/// transport-level close has a chance to settle.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How long the sender keeps "100%" visible before completing. Also covers
/// channel buffers draining before teardown.
const SENDER_GRACE: Duration = Duration::from_secs(1);

/// Receiver-side grace before completing, enough for the UI to show the
/// finished progress state.
const RECEIVER_GRACE: Duration = Duration::from_millis(500);

/// Label of the single data channel carrying the record snapshot.
const CHANNEL_LABEL: &str = "medications";

/// A point-in-time view of the transfer, published through a watch channel.
#[derive(Debug, Clone, Default)]
pub struct TransferSnapshot {
    /// Current negotiation phase.
    pub phase: TransferPhase,
    /// Payload transfer progress in percent (0 or 100; the snapshot travels
    /// as a single message).
    pub progress: u8,
    /// Seconds until the pairing code expires, while the sender is waiting.
    pub time_remaining_secs: Option<i64>,
    /// The active pairing code, once known.
    pub pairing_code: Option<String>,
}

impl TransferSnapshot {
    /// The coarse status label for the UI.
    pub fn status(&self) -> &'static str {
        self.phase.label()
    }

    /// The failure message, if the transfer ended in an error.
    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            TransferPhase::Error { message } => Some(message),
            _ => None,
        }
    }
}

struct Active<C> {
    session_id: SessionId,
    conn: Arc<C>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner<R, T: PeerTransport> {
    relay: R,
    transport: T,
    snapshot_tx: watch::Sender<TransferSnapshot>,
    active: AsyncMutex<Option<Active<T::Conn>>>,
    tracker: Mutex<CandidateTracker>,
    // The candidate batch this side published; entries matching it are
    // skipped when applying the shared list, which holds both sides' batches.
    own_candidates: Mutex<Vec<IceCandidate>>,
}

/// Handle driving one transfer at a time.
///
/// Cloning is cheap and all clones share the same session; starting a new
/// role tears the previous session down first.
pub struct SyncHandle<R: RelayStore, T: PeerTransport> {
    inner: Arc<Inner<R, T>>,
}

impl<R: RelayStore, T: PeerTransport> Clone for SyncHandle<R, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RelayStore, T: PeerTransport> SyncHandle<R, T> {
    /// Create a handle over a relay and a peer transport.
    pub fn new(relay: R, transport: T) -> Self {
        let (snapshot_tx, _) = watch::channel(TransferSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                relay,
                transport,
                snapshot_tx,
                active: AsyncMutex::new(None),
                tracker: Mutex::new(CandidateTracker::new()),
                own_candidates: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<TransferSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> TransferSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Start the sender role: publish a fresh pairing code plus offer and
    /// wait for a receiver. Returns the pairing code to display.
    ///
    /// `records` is the snapshot that will be sent once a receiver connects.
    pub async fn start_sender(
        &self,
        records: Vec<MedicationRecord>,
    ) -> Result<String, SyncError> {
        self.teardown().await;
        self.dispatch(Event::SenderStart);

        let code = generate_code();
        self.inner
            .snapshot_tx
            .send_modify(|snap| snap.pairing_code = Some(code.clone()));
        tracing::info!(code = %code, "starting sender session");

        let conn = match self.inner.transport.new_connection().await {
            Ok(conn) => Arc::new(conn),
            Err(err) => return Err(self.fail_with(format!("connection failed: {err}")).await),
        };
        // The connection exists but is not yet registered in `active`, so
        // every error exit below must close it explicitly.
        let channel = match conn.create_channel(CHANNEL_LABEL).await {
            Ok(channel) => channel,
            Err(err) => {
                conn.close().await;
                return Err(self.fail_with(format!("connection failed: {err}")).await);
            }
        };
        let offer = match conn.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                conn.close().await;
                return Err(self.fail_with(format!("connection failed: {err}")).await);
            }
        };
        let batch = match conn.gather_candidates().await {
            Ok(batch) => batch,
            Err(err) => {
                conn.close().await;
                return Err(self.fail_with(format!("connection failed: {err}")).await);
            }
        };

        let session = match self.inner.relay.create_session(&code, offer).await {
            Ok(session) => session,
            Err(err) => {
                conn.close().await;
                let message = format!("failed to create session: {err}");
                self.fail(message.clone()).await;
                return Err(SyncError::Relay(message));
            }
        };
        *self.inner.own_candidates.lock().expect("candidates lock poisoned") = batch.clone();
        if let Err(err) = self
            .inner
            .relay
            .update_session(session.id, SessionPatch::candidates(batch))
            .await
        {
            conn.close().await;
            let message = format!("failed to publish candidates: {err}");
            self.fail(message.clone()).await;
            return Err(SyncError::Relay(message));
        }

        let mut tasks = Vec::new();
        for action in self.dispatch(Event::SessionPublished) {
            if action == Action::StartCountdown {
                tasks.push(self.spawn_countdown(&session));
            }
        }
        tasks.push(self.spawn_watcher(&conn, &session));
        tasks.push(self.spawn_sender_channel(channel, records, session.id));
        tasks.push(self.spawn_event_pump(&conn));

        *self.inner.active.lock().await = Some(Active {
            session_id: session.id,
            conn,
            tasks,
        });

        Ok(code)
    }

    /// Start the receiver role: look up the sender's session by pairing
    /// code, answer it, and receive the record snapshot.
    ///
    /// `on_received` is called exactly once with the decoded records if the
    /// transfer succeeds.
    pub async fn start_receiver<F>(&self, code: &str, on_received: F) -> Result<(), SyncError>
    where
        F: FnOnce(Vec<MedicationRecord>) + Send + 'static,
    {
        // Reject malformed codes up front, without touching the current
        // session or the relay.
        let code = strip_code(code);
        if !validate_code(&code) {
            return Err(SyncError::InvalidCode(code));
        }

        self.teardown().await;
        self.dispatch(Event::ReceiverStart);
        self.inner
            .snapshot_tx
            .send_modify(|snap| snap.pairing_code = Some(code.clone()));
        tracing::info!(code = %code, "starting receiver session");

        let session = match self.inner.relay.find_by_code(&code).await {
            Ok(session) => session,
            Err(RelayError::NotFound) => {
                self.fail("pairing code not found or expired").await;
                return Err(SyncError::SessionNotFound);
            }
            Err(err) => {
                let message = format!("relay lookup failed: {err}");
                self.fail(message.clone()).await;
                return Err(SyncError::Relay(message));
            }
        };
        if session.is_expired(Utc::now()) {
            self.fail("pairing code expired").await;
            return Err(SyncError::CodeExpired);
        }

        let conn = match self.inner.transport.new_connection().await {
            Ok(conn) => Arc::new(conn),
            Err(err) => return Err(self.fail_with(format!("connection failed: {err}")).await),
        };
        // As in start_sender: not registered in `active` yet, so every
        // error exit below must close the connection explicitly.
        if let Err(err) = conn.set_remote_description(session.offer.clone()).await {
            conn.close().await;
            return Err(self.fail_with(format!("connection failed: {err}")).await);
        }
        let answer = match conn.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                conn.close().await;
                return Err(self.fail_with(format!("connection failed: {err}")).await);
            }
        };
        let batch = match conn.gather_candidates().await {
            Ok(batch) => batch,
            Err(err) => {
                conn.close().await;
                return Err(self.fail_with(format!("connection failed: {err}")).await);
            }
        };
        *self.inner.own_candidates.lock().expect("candidates lock poisoned") = batch.clone();

        // One write publishes the answer and our candidate batch together.
        let updated = match self
            .inner
            .relay
            .update_session(session.id, SessionPatch::answer(answer).with_candidates(batch))
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                conn.close().await;
                let message = format!("failed to publish answer: {err}");
                self.fail(message.clone()).await;
                return Err(SyncError::Relay(message));
            }
        };

        let mut tasks = Vec::new();
        tasks.push(self.spawn_watcher(&conn, &updated));
        tasks.push(self.spawn_receiver_channel(&conn, on_received, updated.id));
        tasks.push(self.spawn_event_pump(&conn));

        *self.inner.active.lock().await = Some(Active {
            session_id: updated.id,
            conn: Arc::clone(&conn),
            tasks,
        });

        // The sender's candidates were already on the session row; apply
        // them now rather than waiting for the next update.
        self.handle_session_update(&conn, &updated, DiscoveryPath::Poll)
            .await;

        Ok(())
    }

    /// Cancel the current transfer, whatever phase it is in, and return to
    /// idle. Safe to call when nothing is running.
    pub async fn cancel(&self) {
        tracing::info!("transfer cancelled");
        for action in self.dispatch(Event::Cancelled) {
            if action == Action::Release {
                self.release().await;
            }
        }
        self.inner.snapshot_tx.send_modify(|snap| {
            snap.progress = 0;
            snap.time_remaining_secs = None;
            snap.pairing_code = None;
        });
    }

    /// Feed one event through the state machine, updating the published
    /// snapshot, and return the actions to execute.
    fn dispatch(&self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        self.inner.snapshot_tx.send_modify(|snap| {
            let phase = std::mem::take(&mut snap.phase);
            tracing::debug!(from = phase.label(), event = ?event, "dispatching event");
            let (next, out) = phase.on_event(event);
            snap.phase = next;
            actions = out;
        });
        actions
    }

    /// Dispatch a failure and release resources; returns the error to
    /// propagate to the caller.
    async fn fail_with(&self, message: impl Into<String>) -> SyncError {
        let message = message.into();
        self.fail(message.clone()).await;
        SyncError::Connection(message)
    }

    async fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "transfer failed");
        for action in self.dispatch(Event::Failed { message }) {
            if action == Action::Release {
                self.release().await;
            }
        }
    }

    /// Close the connection and stop all background tasks for the current
    /// session, if any. Idempotent.
    async fn release(&self) {
        let active = self.inner.active.lock().await.take();
        if let Some(active) = active {
            tracing::debug!(session = %active.session_id, "releasing session resources");
            active.conn.close().await;
            for task in active.tasks {
                task.abort();
            }
        }
    }

    /// Tear down any previous session and reset per-session bookkeeping
    /// before starting a new role.
    async fn teardown(&self) {
        let had_session = self.inner.active.lock().await.is_some();
        self.release().await;
        self.inner
            .snapshot_tx
            .send_modify(|snap| *snap = TransferSnapshot::default());
        *self.inner.tracker.lock().expect("tracker lock poisoned") = CandidateTracker::new();
        self.inner
            .own_candidates
            .lock()
            .expect("candidates lock poisoned")
            .clear();
        if had_session {
            tokio::time::sleep(SETTLE_DELAY).await;
        }
    }

    /// Complete the transfer: delete the relay session (best effort) and
    /// release resources.
    async fn finish(&self, session_id: SessionId) {
        for action in self.dispatch(Event::TransferFinished) {
            match action {
                Action::DeleteSession => {
                    if let Err(err) = self.inner.relay.delete_session(session_id).await {
                        tracing::warn!(error = %err, "failed to delete relay session");
                    }
                }
                Action::Release => self.release().await,
                _ => {}
            }
        }
        tracing::info!("transfer completed");
    }

    /// React to a fresh session snapshot from either discovery path.
    async fn handle_session_update(
        &self,
        conn: &Arc<T::Conn>,
        session: &SyncSession,
        via: DiscoveryPath,
    ) {
        if session.answer.is_some() {
            for action in self.dispatch(Event::AnswerObserved { via }) {
                match action {
                    Action::ApplyAnswer { via } => {
                        tracing::info!(path = %via, "applying remote answer");
                        if let Some(answer) = &session.answer {
                            if let Err(err) = conn.set_remote_description(answer.clone()).await {
                                self.fail(format!("connection failed: {err}")).await;
                                return;
                            }
                        }
                    }
                    Action::ApplyNewCandidates => self.apply_new_candidates(conn, session).await,
                    Action::Release => self.release().await,
                    _ => {}
                }
            }
        }

        let total = session.ice_candidates.len();
        let seen = self.inner.tracker.lock().expect("tracker lock poisoned").seen();
        if total > seen {
            for action in self.dispatch(Event::CandidatesObserved { total, via }) {
                if action == Action::ApplyNewCandidates {
                    self.apply_new_candidates(conn, session).await;
                }
            }
        }
    }

    /// Apply the not-yet-seen suffix of the shared candidate list, skipping
    /// the entries this side published itself.
    async fn apply_new_candidates(&self, conn: &Arc<T::Conn>, session: &SyncSession) {
        let fresh = self
            .inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .take_new(&session.ice_candidates);
        let own = self
            .inner
            .own_candidates
            .lock()
            .expect("candidates lock poisoned")
            .clone();
        for candidate in fresh.into_iter().filter(|c| !own.contains(c)) {
            if let Err(err) = conn.add_candidate(candidate).await {
                // Individual candidates may legitimately fail; the
                // connection only needs one working pair.
                tracing::warn!(error = %err, "failed to apply remote candidate");
            }
        }
    }

    /// Sender-side expiry countdown, driven by the relay-assigned
    /// `expires_at` rather than a local duration.
    fn spawn_countdown(&self, session: &SyncSession) -> JoinHandle<()> {
        let handle = self.clone();
        let expires_at = session.expires_at;
        handle.inner.snapshot_tx.send_modify(|snap| {
            snap.time_remaining_secs = Some((expires_at - Utc::now()).num_seconds().max(0));
        });
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(COUNTDOWN_TICK);
            tick.tick().await;
            loop {
                tick.tick().await;
                let remaining = (expires_at - Utc::now()).num_seconds();
                handle
                    .inner
                    .snapshot_tx
                    .send_modify(|snap| snap.time_remaining_secs = Some(remaining.max(0)));
                if remaining <= 0 {
                    tracing::info!("pairing code expired");
                    for action in handle.dispatch(Event::Expired) {
                        if action == Action::Release {
                            handle.release().await;
                        }
                    }
                    break;
                }
            }
        })
    }

    /// Watch the session on both discovery paths and feed updates through
    /// the state machine.
    fn spawn_watcher(&self, conn: &Arc<T::Conn>, session: &SyncSession) -> JoinHandle<()> {
        let handle = self.clone();
        let conn = Arc::clone(conn);
        let session_id = session.id;
        let code = session.pairing_code.clone();
        tokio::spawn(async move {
            let mut updates = handle.inner.relay.subscribe(session_id).await.ok();
            let mut poll = tokio::time::interval(POLL_INTERVAL);
            poll.tick().await;
            loop {
                tokio::select! {
                    update = async {
                        match updates.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => match update {
                        Some(session) => {
                            handle
                                .handle_session_update(&conn, &session, DiscoveryPath::Push)
                                .await;
                        }
                        None => {
                            // Subscription gone; polling keeps covering us.
                            tracing::debug!("push subscription closed");
                            updates = None;
                        }
                    },
                    _ = poll.tick() => match handle.inner.relay.find_by_code(&code).await {
                        Ok(session) => {
                            handle
                                .handle_session_update(&conn, &session, DiscoveryPath::Poll)
                                .await;
                        }
                        // Deleted or expired; expiry and completion are
                        // handled by their own paths.
                        Err(RelayError::NotFound) => {}
                        Err(err) => tracing::warn!(error = %err, "session poll failed"),
                    },
                }
                if handle.snapshot().phase.is_terminal() {
                    break;
                }
            }
        })
    }

    /// Sender side: wait for the channel, then ship the snapshot.
    fn spawn_sender_channel(
        &self,
        channel: <T::Conn as PeerConnection>::Channel,
        records: Vec<MedicationRecord>,
        session_id: SessionId,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            if let Err(err) = channel.ready().await {
                handle.fail(format!("connection failed: {err}")).await;
                return;
            }
            let send_now = handle
                .dispatch(Event::ChannelOpened)
                .contains(&Action::SendPayload);
            if !send_now {
                return;
            }
            let payload = match encode_records(&records) {
                Ok(payload) => payload,
                Err(err) => {
                    handle.fail(format!("failed to serialize records: {err}")).await;
                    return;
                }
            };
            if let Err(err) = channel.send(&payload).await {
                handle.fail(format!("failed to send records: {err}")).await;
                return;
            }
            tracing::info!(records = records.len(), bytes = payload.len(), "snapshot sent");
            handle.inner.snapshot_tx.send_modify(|snap| snap.progress = 100);
            tokio::time::sleep(SENDER_GRACE).await;
            handle.finish(session_id).await;
        })
    }

    /// Receiver side: wait for the sender's channel, decode the one payload
    /// message, and hand the records to the callback.
    fn spawn_receiver_channel<F>(
        &self,
        conn: &Arc<T::Conn>,
        on_received: F,
        session_id: SessionId,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Vec<MedicationRecord>) + Send + 'static,
    {
        let handle = self.clone();
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            let channel = match conn.incoming_channel().await {
                Ok(channel) => channel,
                Err(err) => {
                    handle.fail(format!("connection failed: {err}")).await;
                    return;
                }
            };
            let data = match channel.recv().await {
                Ok(data) => data,
                Err(err) => {
                    handle.fail(format!("failed to receive data: {err}")).await;
                    return;
                }
            };
            let decode_now = handle
                .dispatch(Event::MessageReceived)
                .contains(&Action::DecodePayload);
            if !decode_now {
                return;
            }
            match decode_records(&data) {
                Ok(records) => {
                    tracing::info!(records = records.len(), bytes = data.len(), "snapshot received");
                    handle.inner.snapshot_tx.send_modify(|snap| snap.progress = 100);
                    on_received(records);
                    tokio::time::sleep(RECEIVER_GRACE).await;
                    handle.finish(session_id).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "payload decode failed");
                    handle.fail("failed to receive data").await;
                }
            }
        })
    }

    /// Forward transport connection-state events into the state machine.
    fn spawn_event_pump(&self, conn: &Arc<T::Conn>) -> JoinHandle<()> {
        let handle = self.clone();
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            while let Some(event) = conn.next_event().await {
                match event {
                    ConnectionEvent::Connected => {
                        tracing::debug!("transport connected");
                        handle.dispatch(Event::TransportConnected);
                    }
                    ConnectionEvent::Failed { reason } => {
                        handle.fail(format!("connection failed: {reason}")).await;
                        break;
                    }
                }
            }
        })
    }
}
