//! Mock peer transport for testing.
//!
//! Connections made from the same (cloned) transport can be linked into a
//! loopback pair: when one side applies the other's offer, the mock wires a
//! duplex byte pipe between them, and applying the answer back flips the
//! channel open. Failures are scriptable per connection, and applied
//! candidates are captured for verification.

use super::{ConnectionEvent, DataChannel, PeerConnection, PeerError, PeerTransport};
use async_trait::async_trait;
use pair_types::{DescriptorKind, IceCandidate, SessionDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

#[derive(Default)]
struct TransportInner {
    next_id: u64,
    pending_offers: HashMap<String, MockConnection>,
    connections: Vec<MockConnection>,
    fail_next_connection: Option<String>,
    candidate_template: Option<Vec<IceCandidate>>,
}

/// Mock [`PeerTransport`]. Clones share state; both roles in a test use
/// clones of the same transport so their connections can find each other.
#[derive(Clone, Default)]
pub struct MockPeerTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl MockPeerTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next `new_connection()` to fail with the given error.
    pub fn fail_next_connection(&self, error: &str) {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        inner.fail_next_connection = Some(error.to_string());
    }

    /// Override the candidates every subsequent connection "discovers".
    pub fn set_candidate_template(&self, candidates: Vec<IceCandidate>) {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        inner.candidate_template = Some(candidates);
    }

    /// All connections created so far, in creation order.
    pub fn connections(&self) -> Vec<MockConnection> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        inner.connections.clone()
    }
}

fn default_candidates(id: u64) -> Vec<IceCandidate> {
    let host = id % 250 + 1;
    vec![
        IceCandidate::new(format!(
            "candidate:{id} 1 udp 2122260223 192.0.2.{host} 54400 typ host"
        )),
        IceCandidate::new(format!(
            "candidate:{id} 1 udp 1686052607 198.51.100.{host} 61838 typ srflx"
        )),
    ]
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    type Conn = MockConnection;

    async fn new_connection(&self) -> Result<MockConnection, PeerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");

        if let Some(error) = inner.fail_next_connection.take() {
            return Err(PeerError::ConnectionFailed(error));
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let candidates = inner
            .candidate_template
            .clone()
            .unwrap_or_else(|| default_candidates(id));

        let conn = MockConnection::new(id, self.clone(), candidates);
        inner.connections.push(conn.clone());
        Ok(conn)
    }
}

#[derive(Clone)]
struct Link {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    open_tx: Arc<watch::Sender<bool>>,
    open_rx: watch::Receiver<bool>,
    peer_events: mpsc::UnboundedSender<ConnectionEvent>,
}

struct ConnInner {
    local_candidates: Vec<IceCandidate>,
    applied_candidates: Vec<IceCandidate>,
    remote: Option<SessionDescriptor>,
    link: Option<Link>,
    closed: bool,
    failed: Option<String>,
    events_tx: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

/// One mock peer connection.
#[derive(Clone)]
pub struct MockConnection {
    id: u64,
    transport: MockPeerTransport,
    inner: Arc<Mutex<ConnInner>>,
    events_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<ConnectionEvent>>>,
}

impl MockConnection {
    fn new(id: u64, transport: MockPeerTransport, local_candidates: Vec<IceCandidate>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id,
            transport,
            inner: Arc::new(Mutex::new(ConnInner {
                local_candidates,
                applied_candidates: Vec::new(),
                remote: None,
                link: None,
                closed: false,
                failed: None,
                events_tx: Some(events_tx),
            })),
            events_rx: Arc::new(AsyncMutex::new(events_rx)),
        }
    }

    /// Candidates applied via `add_candidate`, in application order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        inner.applied_candidates.clone()
    }

    /// The candidates this connection "discovers" during gathering.
    pub fn local_candidates(&self) -> Vec<IceCandidate> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        inner.local_candidates.clone()
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        let inner = self.inner.lock().expect("mock lock poisoned");
        inner.closed
    }

    /// Script a connection failure: subsequent channel operations fail and
    /// a `Failed` event is emitted.
    pub fn inject_failure(&self, reason: &str) {
        let events_tx = {
            let mut inner = self.inner.lock().expect("mock lock poisoned");
            inner.failed = Some(reason.to_string());
            inner.events_tx.clone()
        };
        if let Some(tx) = events_tx {
            let _ = tx.send(ConnectionEvent::Failed {
                reason: reason.to_string(),
            });
        }
    }

    fn link_pair(sender: &MockConnection, receiver: &MockConnection) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = watch::channel(false);
        let open_tx = Arc::new(open_tx);

        let sender_events = {
            let inner = sender.inner.lock().expect("mock lock poisoned");
            inner.events_tx.clone()
        };
        let receiver_events = {
            let inner = receiver.inner.lock().expect("mock lock poisoned");
            inner.events_tx.clone()
        };
        let (Some(sender_events), Some(receiver_events)) = (sender_events, receiver_events) else {
            return; // one side already closed, nothing to link
        };

        {
            let mut inner = sender.inner.lock().expect("mock lock poisoned");
            inner.link = Some(Link {
                tx: a_tx,
                rx: Arc::new(AsyncMutex::new(b_rx)),
                open_tx: open_tx.clone(),
                open_rx: open_rx.clone(),
                peer_events: receiver_events,
            });
        }
        {
            let mut inner = receiver.inner.lock().expect("mock lock poisoned");
            inner.link = Some(Link {
                tx: b_tx,
                rx: Arc::new(AsyncMutex::new(a_rx)),
                open_tx,
                open_rx,
                peer_events: sender_events,
            });
        }
    }

    /// Wait until the loopback channel is open (both descriptors applied).
    async fn wait_open(&self) -> Result<(), PeerError> {
        loop {
            let open_rx = {
                let inner = self.inner.lock().expect("mock lock poisoned");
                if inner.closed {
                    return Err(PeerError::Closed);
                }
                if let Some(reason) = &inner.failed {
                    return Err(PeerError::ConnectionFailed(reason.clone()));
                }
                inner.link.as_ref().map(|l| l.open_rx.clone())
            };

            match open_rx {
                Some(mut rx) => {
                    if *rx.borrow() {
                        return Ok(());
                    }
                    if rx.changed().await.is_err() {
                        return Err(PeerError::ChannelClosed);
                    }
                    if *rx.borrow() {
                        return Ok(());
                    }
                }
                // Not linked yet; the peer has not applied our offer.
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    fn current_link(&self) -> Result<Link, PeerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        if inner.closed {
            return Err(PeerError::Closed);
        }
        if let Some(reason) = &inner.failed {
            return Err(PeerError::ConnectionFailed(reason.clone()));
        }
        inner.link.clone().ok_or(PeerError::ChannelClosed)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    type Channel = MockChannel;

    async fn create_offer(&self) -> Result<SessionDescriptor, PeerError> {
        {
            let inner = self.inner.lock().expect("mock lock poisoned");
            if inner.closed {
                return Err(PeerError::Closed);
            }
        }
        let offer = SessionDescriptor::offer(format!("v=0 mock-offer-{}", self.id));

        let mut transport = self.transport.inner.lock().expect("mock lock poisoned");
        transport
            .pending_offers
            .insert(offer.sdp.clone(), self.clone());
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescriptor, PeerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        if inner.closed {
            return Err(PeerError::Closed);
        }
        match &inner.remote {
            Some(desc) if desc.kind == DescriptorKind::Offer => {
                Ok(SessionDescriptor::answer(format!(
                    "v=0 mock-answer-{}",
                    self.id
                )))
            }
            _ => Err(PeerError::InvalidState(
                "create_answer requires a remote offer".into(),
            )),
        }
    }

    async fn set_remote_description(&self, desc: SessionDescriptor) -> Result<(), PeerError> {
        {
            let mut inner = self.inner.lock().expect("mock lock poisoned");
            if inner.closed {
                return Err(PeerError::Closed);
            }
            inner.remote = Some(desc.clone());
        }

        match desc.kind {
            DescriptorKind::Offer => {
                // Receiver side: find the offering connection and wire the pipe.
                let offerer = {
                    let transport = self.transport.inner.lock().expect("mock lock poisoned");
                    transport.pending_offers.get(&desc.sdp).cloned()
                };
                if let Some(offerer) = offerer {
                    Self::link_pair(&offerer, self);
                }
                Ok(())
            }
            DescriptorKind::Answer => {
                // Sender side: both descriptors applied, the channel opens.
                let (link, own_events) = {
                    let inner = self.inner.lock().expect("mock lock poisoned");
                    (inner.link.clone(), inner.events_tx.clone())
                };
                if let Some(link) = link {
                    let _ = link.open_tx.send(true);
                    if let Some(tx) = own_events {
                        let _ = tx.send(ConnectionEvent::Connected);
                    }
                    let _ = link.peer_events.send(ConnectionEvent::Connected);
                }
                Ok(())
            }
        }
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        if inner.closed {
            return Err(PeerError::Closed);
        }
        if inner.remote.is_none() {
            return Err(PeerError::InvalidState(
                "add_candidate requires a remote description".into(),
            ));
        }
        inner.applied_candidates.push(candidate);
        Ok(())
    }

    async fn gather_candidates(&self) -> Result<Vec<IceCandidate>, PeerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        if inner.closed {
            return Err(PeerError::Closed);
        }
        // Gathering completes immediately in the mock.
        Ok(inner.local_candidates.clone())
    }

    async fn create_channel(&self, label: &str) -> Result<MockChannel, PeerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        if inner.closed {
            return Err(PeerError::Closed);
        }
        Ok(MockChannel {
            conn: self.clone(),
            label: label.to_string(),
        })
    }

    async fn incoming_channel(&self) -> Result<MockChannel, PeerError> {
        self.wait_open().await?;
        Ok(MockChannel {
            conn: self.clone(),
            label: "remote".to_string(),
        })
    }

    async fn next_event(&self) -> Option<ConnectionEvent> {
        self.events_rx.lock().await.recv().await
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        inner.closed = true;
        inner.link = None;
        inner.events_tx = None;
    }
}

/// The mock's reliable ordered channel: an unbounded in-process pipe.
pub struct MockChannel {
    conn: MockConnection,
    label: String,
}

impl MockChannel {
    /// The label the channel was created with.
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    async fn ready(&self) -> Result<(), PeerError> {
        self.conn.wait_open().await
    }

    async fn send(&self, data: &[u8]) -> Result<(), PeerError> {
        let link = self.conn.current_link()?;
        link.tx
            .send(data.to_vec())
            .map_err(|_| PeerError::ChannelClosed)
    }

    async fn recv(&self) -> Result<Vec<u8>, PeerError> {
        self.conn.wait_open().await?;
        let link = self.conn.current_link()?;
        let mut rx = link.rx.lock().await;
        rx.recv().await.ok_or(PeerError::ChannelClosed)
    }

    async fn close(&self) {
        // Channel lifetime is tied to the connection in the mock.
    }
}
