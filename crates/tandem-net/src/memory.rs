//! In-process substrate.
//!
//! Brokers sessions between clients living in the same process. Used by the
//! test suites and for local demos; behaves like a signaling server that
//! never loses messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tandem_shared::PeerId;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::substrate::{
    ChannelEvent, ChannelSink, DataChannel, Registration, Substrate, SubstrateError,
    SubstrateEvent,
};

#[derive(Default)]
struct BrokerState {
    peers: HashMap<PeerId, mpsc::UnboundedSender<SubstrateEvent>>,
    offline: bool,
    connect_attempts: Vec<(PeerId, PeerId)>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every registration fail as if the signaling server were down.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn is_registered(&self, id: &PeerId) -> bool {
        self.lock()
            .peers
            .get(id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Every `(from, to)` pair passed to `connect`, in call order.
    pub fn connect_attempts(&self) -> Vec<(PeerId, PeerId)> {
        self.lock().connect_attempts.clone()
    }

    /// Drop a registration and tell its owner, as a lost signaling link would.
    pub fn drop_registration(&self, id: &PeerId) {
        if let Some(tx) = self.lock().peers.remove(id) {
            let _ = tx.send(SubstrateEvent::Disconnected);
        }
    }

    /// Report an asynchronous substrate failure to a registration's owner.
    pub fn inject_error(&self, id: &PeerId, error: SubstrateError) {
        if let Some(tx) = self.lock().peers.get(id) {
            let _ = tx.send(SubstrateEvent::Error(error));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Substrate for MemoryBroker {
    async fn register(&self, requested: Option<PeerId>) -> Result<Registration, SubstrateError> {
        let mut state = self.lock();
        if state.offline {
            return Err(SubstrateError::Unreachable("broker offline".into()));
        }

        let id = match requested {
            Some(id) => {
                if state.peers.get(&id).is_some_and(|tx| !tx.is_closed()) {
                    return Err(SubstrateError::IdUnavailable(id));
                }
                id
            }
            None => PeerId::new(Uuid::new_v4().to_string()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        state.peers.insert(id.clone(), tx);
        debug!(peer = %id.short(), "registered with memory broker");

        Ok(Registration { id, events: rx })
    }

    async fn connect(
        &self,
        local: &PeerId,
        remote: &PeerId,
    ) -> Result<DataChannel, SubstrateError> {
        let mut state = self.lock();
        state
            .connect_attempts
            .push((local.clone(), remote.clone()));

        let target = state
            .peers
            .get(remote)
            .filter(|tx| !tx.is_closed())
            .cloned()
            .ok_or_else(|| SubstrateError::PeerUnavailable(remote.clone()))?;

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        let _ = local_tx.send(ChannelEvent::Open);
        let _ = remote_tx.send(ChannelEvent::Open);

        let outbound = DataChannel::new(remote.clone(), MemorySink { remote: remote_tx }, local_rx);
        let inbound = DataChannel::new(local.clone(), MemorySink { remote: local_tx }, remote_rx);

        target
            .send(SubstrateEvent::Incoming(inbound))
            .map_err(|_| SubstrateError::PeerUnavailable(remote.clone()))?;

        debug!(from = %local.short(), to = %remote.short(), "memory session brokered");
        Ok(outbound)
    }

    async fn unregister(&self, id: &PeerId) {
        if self.lock().peers.remove(id).is_some() {
            debug!(peer = %id.short(), "unregistered from memory broker");
        }
    }
}

/// Delivers straight into the remote side's event queue.
struct MemorySink {
    remote: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelSink for MemorySink {
    fn send(&self, data: Bytes) -> Result<(), SubstrateError> {
        self.remote
            .send(ChannelEvent::Data(data))
            .map_err(|_| SubstrateError::Transport("session closed".into()))
    }

    fn close(&self) {
        let _ = self.remote.send(ChannelEvent::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claimed_id_is_rejected() {
        let broker = MemoryBroker::new();
        let first = broker.register(Some("alice".into())).await.unwrap();
        assert_eq!(first.id, PeerId::new("alice"));

        let err = broker.register(Some("alice".into())).await.unwrap_err();
        assert_eq!(err, SubstrateError::IdUnavailable("alice".into()));

        drop(first);
        assert!(broker.register(Some("alice".into())).await.is_ok());
    }

    #[tokio::test]
    async fn session_delivers_in_order() {
        let broker = MemoryBroker::new();
        let a = broker.register(None).await.unwrap();
        let mut b = broker.register(None).await.unwrap();

        let mut outbound = broker.connect(&a.id, &b.id).await.unwrap();
        let Some(SubstrateEvent::Incoming(mut inbound)) = b.events.recv().await else {
            panic!("expected incoming session");
        };
        assert_eq!(inbound.peer(), &a.id);
        assert_eq!(outbound.next_event().await, ChannelEvent::Open);
        assert_eq!(inbound.next_event().await, ChannelEvent::Open);

        outbound.send(Bytes::from_static(b"1")).unwrap();
        outbound.send(Bytes::from_static(b"2")).unwrap();
        assert_eq!(inbound.next_event().await, ChannelEvent::Data(Bytes::from_static(b"1")));
        assert_eq!(inbound.next_event().await, ChannelEvent::Data(Bytes::from_static(b"2")));

        drop(outbound);
        assert_eq!(inbound.next_event().await, ChannelEvent::Close);
    }

    #[tokio::test]
    async fn unknown_peer_is_unavailable() {
        let broker = MemoryBroker::new();
        let a = broker.register(None).await.unwrap();
        let err = broker.connect(&a.id, &"ghost".into()).await.unwrap_err();
        assert_eq!(err, SubstrateError::PeerUnavailable("ghost".into()));
        assert_eq!(broker.connect_attempts().len(), 1);
    }
}
