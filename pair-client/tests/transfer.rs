//! End-to-end transfer tests against the in-memory relay and the mock peer
//! transport. Time is paused so countdowns, grace delays, and polling run
//! instantly.

use medpair_client::{
    DataChannel, MemoryRelay, MockPeerTransport, PeerConnection, PeerTransport, RelayStore,
    SyncHandle, TransferSnapshot,
};
use pair_core::TransferPhase;
use pair_types::{DoseInterval, MedicationRecord, RecordId, SessionPatch, SyncError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn record(name: &str) -> MedicationRecord {
    MedicationRecord {
        id: RecordId::new(),
        name: name.into(),
        pzn: None,
        description: None,
        active_ingredient: None,
        indication: None,
        current_amount: 30.0,
        daily_dosage: 1.5,
        interval: DoseInterval::Daily,
        reminder_threshold_days: 7,
        created_at: chrono::Utc::now(),
        last_refilled: None,
        manual_info_override: None,
        personal_notes: None,
        intake_log: None,
    }
}

async fn wait_until(
    rx: &mut watch::Receiver<TransferSnapshot>,
    what: &str,
    pred: impl Fn(&TransferSnapshot) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if pred(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.expect("snapshot channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn is_completed(snap: &TransferSnapshot) -> bool {
    matches!(snap.phase, TransferPhase::Completed)
}

fn is_error(snap: &TransferSnapshot) -> bool {
    matches!(snap.phase, TransferPhase::Error { .. })
}

#[tokio::test(start_paused = true)]
async fn full_transfer_end_to_end() {
    init_tracing();
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());
    let receiver = SyncHandle::new(relay.clone(), transport.clone());
    let mut sender_snap = sender.subscribe();
    let mut receiver_snap = receiver.subscribe();

    let records = vec![record("Aspirin 500"), record("Metformin 850")];
    let code = sender.start_sender(records.clone()).await.unwrap();
    assert_eq!(code.len(), 6);
    assert_eq!(sender.snapshot().pairing_code.as_deref(), Some(code.as_str()));

    let received = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&received);
    receiver
        .start_receiver(&code, move |records| {
            *sink.lock().unwrap() = Some(records);
        })
        .await
        .unwrap();

    wait_until(&mut receiver_snap, "receiver completion", is_completed).await;
    wait_until(&mut sender_snap, "sender completion", is_completed).await;

    let received = received.lock().unwrap().take().expect("callback never ran");
    assert_eq!(received, records);
    assert_eq!(sender.snapshot().progress, 100);
    assert_eq!(receiver.snapshot().progress, 100);

    // Completion deletes the relay session so the code cannot be replayed.
    assert_eq!(relay.live_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn each_side_applies_only_the_peers_candidates() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());
    let receiver = SyncHandle::new(relay.clone(), transport.clone());
    let mut receiver_snap = receiver.subscribe();

    let code = sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    receiver.start_receiver(&code, |_| {}).await.unwrap();
    wait_until(&mut receiver_snap, "receiver completion", is_completed).await;

    let conns = transport.connections();
    let (sender_conn, receiver_conn) = (&conns[0], &conns[1]);

    // The relay row holds both batches; the own-candidate filter keeps each
    // side from feeding its own entries back into its connection.
    assert_eq!(
        receiver_conn.applied_candidates(),
        sender_conn.local_candidates()
    );
    assert_eq!(
        sender_conn.applied_candidates(),
        receiver_conn.local_candidates()
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_code_is_rejected_without_touching_state() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let receiver = SyncHandle::new(relay, transport);

    for bad in ["", "K7X", "K7X9M2Z", "O0I1AB"] {
        let result = receiver.start_receiver(bad, |_| {}).await;
        assert!(matches!(result, Err(SyncError::InvalidCode(_))), "{bad:?}");
    }
    assert_eq!(receiver.snapshot().phase, TransferPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn well_formed_but_unknown_code_fails() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let receiver = SyncHandle::new(relay, transport);

    let result = receiver.start_receiver("K7X9M2", |_| {}).await;
    assert!(matches!(result, Err(SyncError::SessionNotFound)));

    let snap = receiver.snapshot();
    assert_eq!(snap.error(), Some("pairing code not found or expired"));
}

#[tokio::test(start_paused = true)]
async fn lowercase_and_spaced_codes_are_accepted() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());
    let receiver = SyncHandle::new(relay, transport);
    let mut receiver_snap = receiver.subscribe();

    let code = sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    let typed = format!("{} {}", &code[..3].to_lowercase(), &code[3..].to_lowercase());

    receiver.start_receiver(&typed, |_| {}).await.unwrap();
    wait_until(&mut receiver_snap, "receiver completion", is_completed).await;
}

#[tokio::test(start_paused = true)]
async fn sender_code_expires_without_a_receiver() {
    let relay = MemoryRelay::with_ttl(chrono::Duration::seconds(3));
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay, transport.clone());
    let mut snap = sender.subscribe();

    sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    assert!(sender.snapshot().time_remaining_secs.is_some());

    wait_until(&mut snap, "expiry", is_error).await;
    assert_eq!(sender.snapshot().error(), Some("pairing code expired"));
    assert_eq!(sender.snapshot().time_remaining_secs, Some(0));
    assert!(transport.connections()[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn cancel_releases_resources_and_returns_to_idle() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());

    sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    assert_eq!(sender.snapshot().phase, TransferPhase::Waiting);

    sender.cancel().await;

    let snap = sender.snapshot();
    assert_eq!(snap.phase, TransferPhase::Idle);
    assert_eq!(snap.pairing_code, None);
    assert_eq!(snap.time_remaining_secs, None);
    assert!(transport.connections()[0].is_closed());
    // The relay row is left to its server-side expiry.
    assert_eq!(relay.live_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn starting_again_tears_down_the_previous_session() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay, transport.clone());

    let first = sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    let second = sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    assert_ne!(first, second);

    let conns = transport.connections();
    assert!(conns[0].is_closed());
    assert!(!conns[1].is_closed());
    assert_eq!(
        sender.snapshot().pairing_code.as_deref(),
        Some(second.as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn relay_outage_during_publish_is_a_terminal_error() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());

    relay.fail_next_create("backend down");
    let result = sender.start_sender(vec![record("Aspirin 500")]).await;

    assert!(matches!(result, Err(SyncError::Relay(_))));
    assert!(is_error(&sender.snapshot()));
    // The connection predates the relay call and is not yet registered in
    // the session; the error path must still close it.
    assert!(transport.connections()[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn sender_connection_is_closed_when_candidate_publish_fails() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());

    relay.fail_next_update("backend down");
    let result = sender.start_sender(vec![record("Aspirin 500")]).await;

    assert!(matches!(result, Err(SyncError::Relay(_))));
    assert!(transport.connections()[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn receiver_connection_is_closed_when_answer_publish_fails() {
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());
    let receiver = SyncHandle::new(relay.clone(), transport.clone());

    let code = sender.start_sender(vec![record("Aspirin 500")]).await.unwrap();
    relay.fail_next_update("backend down");
    let result = receiver.start_receiver(&code, |_| {}).await;

    assert!(matches!(result, Err(SyncError::Relay(_))));
    let conns = transport.connections();
    assert!(conns[1].is_closed());
    // The sender's own connection is untouched.
    assert!(!conns[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn garbled_payload_fails_the_receiver() {
    init_tracing();
    let relay = MemoryRelay::new();
    let transport = MockPeerTransport::new();

    // Hand-driven sender publishing a non-JSON payload.
    let conn = transport.new_connection().await.unwrap();
    let channel = conn.create_channel("medications").await.unwrap();
    let offer = conn.create_offer().await.unwrap();
    let session = relay.create_session("K7X9M2", offer).await.unwrap();
    let batch = conn.gather_candidates().await.unwrap();
    relay
        .update_session(session.id, SessionPatch::candidates(batch))
        .await
        .unwrap();
    let mut updates = relay.subscribe(session.id).await.unwrap();

    let receiver = SyncHandle::new(relay.clone(), transport.clone());
    let mut receiver_snap = receiver.subscribe();
    receiver
        .start_receiver("K7X9M2", |_| panic!("garbled payload must not decode"))
        .await
        .unwrap();

    // Apply the receiver's answer manually and ship garbage.
    let answer = loop {
        let snapshot = updates.recv().await.unwrap();
        if let Some(answer) = snapshot.answer {
            break answer;
        }
    };
    conn.set_remote_description(answer).await.unwrap();
    channel.send(b"definitely not json").await.unwrap();

    wait_until(&mut receiver_snap, "receiver failure", is_error).await;
    assert_eq!(receiver.snapshot().error(), Some("failed to receive data"));
    assert!(transport.connections()[1].is_closed());
}

#[tokio::test(start_paused = true)]
async fn transfer_completes_without_push_notifications() {
    // A relay whose subscriptions never deliver; the poll path must carry
    // the whole handshake alone.
    #[derive(Clone)]
    struct SilentRelay(MemoryRelay);

    #[async_trait::async_trait]
    impl RelayStore for SilentRelay {
        async fn create_session(
            &self,
            code: &str,
            offer: pair_types::SessionDescriptor,
        ) -> Result<pair_types::SyncSession, medpair_client::RelayError> {
            self.0.create_session(code, offer).await
        }

        async fn find_by_code(
            &self,
            code: &str,
        ) -> Result<pair_types::SyncSession, medpair_client::RelayError> {
            self.0.find_by_code(code).await
        }

        async fn update_session(
            &self,
            id: pair_types::SessionId,
            patch: SessionPatch,
        ) -> Result<pair_types::SyncSession, medpair_client::RelayError> {
            self.0.update_session(id, patch).await
        }

        async fn delete_session(
            &self,
            id: pair_types::SessionId,
        ) -> Result<(), medpair_client::RelayError> {
            self.0.delete_session(id).await
        }

        async fn subscribe(
            &self,
            _id: pair_types::SessionId,
        ) -> Result<medpair_client::SessionUpdates, medpair_client::RelayError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    init_tracing();
    let relay = SilentRelay(MemoryRelay::new());
    let transport = MockPeerTransport::new();
    let sender = SyncHandle::new(relay.clone(), transport.clone());
    let receiver = SyncHandle::new(relay, transport);
    let mut sender_snap = sender.subscribe();
    let mut receiver_snap = receiver.subscribe();

    let records = vec![record("Aspirin 500")];
    let code = sender.start_sender(records).await.unwrap();
    receiver.start_receiver(&code, |_| {}).await.unwrap();

    wait_until(&mut receiver_snap, "receiver completion", is_completed).await;
    wait_until(&mut sender_snap, "sender completion", is_completed).await;
}
