//! Boundary to the peer-connection substrate.
//!
//! The substrate issues connection addresses, brokers sessions (signaling,
//! NAT traversal) and delivers bytes reliably and in order once a session is
//! open. Everything above this module only sees [`Substrate`],
//! [`DataChannel`] and the two event enums.

use async_trait::async_trait;
use bytes::Bytes;
use tandem_shared::PeerId;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("ID \"{0}\" is taken")]
    IdUnavailable(PeerId),

    #[error("Could not reach the signaling server: {0}")]
    Unreachable(String),

    #[error("Could not connect to peer {0}")]
    PeerUnavailable(PeerId),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Events of the substrate registration itself.
#[derive(Debug)]
pub enum SubstrateEvent {
    /// A remote peer opened a session towards us.
    Incoming(DataChannel),
    /// Asynchronous failure reported by the substrate.
    Error(SubstrateError),
    /// The registration was lost. Open sessions are unaffected.
    Disconnected,
}

/// Events of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Data(Bytes),
    Close,
    Error(String),
}

/// A successful registration with the substrate.
#[derive(Debug)]
pub struct Registration {
    pub id: PeerId,
    pub events: mpsc::UnboundedReceiver<SubstrateEvent>,
}

#[async_trait]
pub trait Substrate: Send + Sync {
    /// Claim `requested`, or have a fresh identifier issued when `None`.
    async fn register(&self, requested: Option<PeerId>) -> Result<Registration, SubstrateError>;

    /// Start an outbound session. The returned channel reports
    /// [`ChannelEvent::Open`] once usable.
    async fn connect(&self, local: &PeerId, remote: &PeerId)
        -> Result<DataChannel, SubstrateError>;

    /// Release a registration so the identifier can be claimed again.
    async fn unregister(&self, id: &PeerId);
}

/// Outbound half of a session, supplied by the substrate implementation.
pub trait ChannelSink: Send + Sync {
    fn send(&self, data: Bytes) -> Result<(), SubstrateError>;
    fn close(&self);
}

/// One reliable, ordered session with a single remote peer.
pub struct DataChannel {
    peer: PeerId,
    sink: Box<dyn ChannelSink>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl DataChannel {
    pub fn new(
        peer: PeerId,
        sink: impl ChannelSink + 'static,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            peer,
            sink: Box::new(sink),
            events,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn send(&self, data: Bytes) -> Result<(), SubstrateError> {
        self.sink.send(data)
    }

    pub fn close(&self) {
        self.sink.close();
    }

    /// Next session event. A vanished event source reads as
    /// [`ChannelEvent::Close`].
    pub async fn next_event(&mut self) -> ChannelEvent {
        self.events.recv().await.unwrap_or(ChannelEvent::Close)
    }
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
