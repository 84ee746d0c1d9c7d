//! Identity & connection manager.
//!
//! Owns the substrate registration (the local identity) and at most one
//! session with a remote peer. State transitions:
//!
//! ```text
//! Uninitialized -> AcquiringIdentity -> Idle -> Connecting -> Connected
//!                                        ^          ^            |
//!                                        |          +-- retry ---+-> Disconnected
//! ```
//!
//! Failures never escape as panics: they land in the `error` field of
//! [`ConnectionStatus`] and the session drops to `Disconnected`.
//!
//! When both peers dial each other at once, each side ends up holding two
//! sessions with the same peer. Both sides keep the one dialled by the lower
//! [`PeerId`] and close the other, so they converge on a single session.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tandem_shared::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::substrate::{ChannelEvent, DataChannel, Substrate, SubstrateError, SubstrateEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Uninitialized,
    AcquiringIdentity,
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Snapshot of the connection for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: SessionState,
    pub local_id: Option<PeerId>,
    pub remote_peer: Option<PeerId>,
    pub connected: bool,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOutcome {
    pub id: PeerId,
    /// The requested identifier was claimed elsewhere and has been given up.
    pub discarded_stale: bool,
}

/// What the manager reports after processing one substrate or session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A remote peer opened a session towards us; not usable until `Connected`.
    Incoming(PeerId),
    /// The session is open.
    Connected(PeerId),
    /// Payload received on the open session.
    Data { from: PeerId, payload: Bytes },
    /// The session closed.
    Disconnected(PeerId),
    /// A transport failure, already recorded in the status.
    Error(String),
    /// The substrate registration was lost; no new sessions until re-acquired.
    RegistrationLost,
}

enum Pending {
    Substrate(Option<SubstrateEvent>),
    Channel(ChannelEvent),
}

pub struct ConnectionManager {
    substrate: Arc<dyn Substrate>,
    local_id: Option<PeerId>,
    registration: Option<mpsc::UnboundedReceiver<SubstrateEvent>>,
    channel: Option<DataChannel>,
    /// Whether `channel` was dialled by us.
    outbound: bool,
    remote_peer: Option<PeerId>,
    state: SessionState,
    error: Option<String>,
}

impl ConnectionManager {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self {
            substrate,
            local_id: None,
            registration: None,
            channel: None,
            outbound: false,
            remote_peer: None,
            state: SessionState::Uninitialized,
            error: None,
        }
    }

    /// Mark an identity acquisition as under way and clear the last error.
    ///
    /// An open session keeps its state: re-registering after a lost
    /// registration does not interrupt it.
    pub fn begin_identity(&mut self) {
        if self.channel.is_none() {
            self.state = SessionState::AcquiringIdentity;
        }
        self.error = None;
    }

    /// Register with the substrate, reusing `persisted` when possible.
    ///
    /// If `persisted` is already claimed (typically by another running
    /// instance) it is abandoned and a fresh identifier is requested.
    pub async fn acquire_identity(
        &mut self,
        persisted: Option<PeerId>,
    ) -> Result<IdentityOutcome, SubstrateError> {
        self.begin_identity();

        let mut requested = persisted;
        let mut discarded_stale = false;

        let registration = loop {
            match self.substrate.register(requested.clone()).await {
                Ok(registration) => break registration,
                Err(SubstrateError::IdUnavailable(id)) if requested.is_some() => {
                    warn!(peer = %id.short(), "stored identifier is claimed elsewhere, requesting a new one");
                    requested = None;
                    discarded_stale = true;
                }
                Err(e) => {
                    warn!(error = %e, "identity acquisition failed");
                    self.error = Some(e.to_string());
                    self.state = if self.channel.is_some() {
                        self.state_for_open_channel()
                    } else {
                        SessionState::Uninitialized
                    };
                    return Err(e);
                }
            }
        };

        info!(peer = %registration.id, reused = !discarded_stale && requested.is_some(), "identity acquired");

        self.local_id = Some(registration.id.clone());
        self.registration = Some(registration.events);
        self.state = if self.channel.is_some() {
            self.state_for_open_channel()
        } else {
            SessionState::Idle
        };

        Ok(IdentityOutcome {
            id: registration.id,
            discarded_stale,
        })
    }

    /// Open an outbound session. Returns `false` without doing anything when
    /// `peer` is ourselves or no identity is registered yet, and when the
    /// substrate could not reach `peer`.
    pub async fn connect_to_peer(&mut self, peer: &PeerId) -> bool {
        let Some(local) = self.local_id.clone() else {
            debug!(peer = %peer.short(), "connect ignored, no identity yet");
            return false;
        };
        if self.registration.is_none() {
            debug!(peer = %peer.short(), "connect ignored, not registered");
            return false;
        }
        if *peer == local {
            debug!("connect ignored, refusing to dial ourselves");
            return false;
        }

        info!(peer = %peer, "connecting");
        self.error = None;

        match self.substrate.connect(&local, peer).await {
            Ok(channel) => {
                self.adopt(channel, true);
                true
            }
            Err(e) => {
                warn!(peer = %peer.short(), error = %e, "connect failed");
                self.error = Some(e.to_string());
                self.drop_session();
                false
            }
        }
    }

    /// Adopt an inbound session. Returns `false` when it lost a simultaneous
    /// dial against the session we already hold with the same peer.
    pub fn accept(&mut self, channel: DataChannel) -> bool {
        info!(peer = %channel.peer(), "inbound session");
        self.adopt(channel, false)
    }

    /// Send on the open session. Returns whether the payload was handed to
    /// the transport.
    pub fn send(&self, payload: Bytes) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        let Some(channel) = self.channel.as_ref() else {
            return false;
        };
        match channel.send(payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %channel.peer().short(), error = %e, "send failed");
                false
            }
        }
    }

    /// Wait for the next substrate or session event and apply it.
    ///
    /// Cancel-safe: nothing is consumed unless the future completes. Pends
    /// forever while there is neither a registration nor a session.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            let pending = tokio::select! {
                event = next_substrate_event(&mut self.registration) => Pending::Substrate(event),
                event = next_channel_event(&mut self.channel) => Pending::Channel(event),
            };

            let event = match pending {
                Pending::Substrate(event) => self.on_substrate_event(event),
                Pending::Channel(event) => self.on_channel_event(event),
            };
            if let Some(event) = event {
                return event;
            }
        }
    }

    /// Drop the session and the registration, forgetting the identity.
    pub async fn reset(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.outbound = false;
        self.registration = None;
        if let Some(id) = self.local_id.take() {
            self.substrate.unregister(&id).await;
        }
        self.remote_peer = None;
        self.error = None;
        self.state = SessionState::Uninitialized;
        info!("connection manager reset");
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            local_id: self.local_id.clone(),
            remote_peer: self.remote_peer.clone(),
            connected: self.is_connected(),
            loading: self.state == SessionState::AcquiringIdentity,
            error: self.error.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    pub fn remote_peer(&self) -> Option<&PeerId> {
        self.remote_peer.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Whether a session exists, open or still opening.
    pub fn has_session(&self) -> bool {
        self.channel.is_some()
    }

    fn on_substrate_event(&mut self, event: Option<SubstrateEvent>) -> Option<ConnectionEvent> {
        match event {
            Some(SubstrateEvent::Incoming(channel)) => {
                let peer = channel.peer().clone();
                self.accept(channel).then_some(ConnectionEvent::Incoming(peer))
            }
            Some(SubstrateEvent::Error(e)) => {
                warn!(error = %e, "substrate error");
                let message = e.to_string();
                self.error = Some(message.clone());
                if let Some(channel) = self.channel.take() {
                    channel.close();
                    self.drop_session();
                }
                Some(ConnectionEvent::Error(message))
            }
            Some(SubstrateEvent::Disconnected) | None => {
                warn!("substrate registration lost");
                self.registration = None;
                Some(ConnectionEvent::RegistrationLost)
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) -> Option<ConnectionEvent> {
        let peer = self.channel.as_ref()?.peer().clone();
        match event {
            ChannelEvent::Open => {
                info!(peer = %peer, "session open");
                self.state = SessionState::Connected;
                self.remote_peer = Some(peer.clone());
                self.error = None;
                Some(ConnectionEvent::Connected(peer))
            }
            ChannelEvent::Data(payload) => Some(ConnectionEvent::Data {
                from: peer,
                payload,
            }),
            ChannelEvent::Close => {
                info!(peer = %peer, "session closed");
                self.drop_session();
                Some(ConnectionEvent::Disconnected(peer))
            }
            ChannelEvent::Error(message) => {
                warn!(peer = %peer.short(), error = %message, "session error");
                self.error = Some(message.clone());
                self.drop_session();
                Some(ConnectionEvent::Error(message))
            }
        }
    }

    /// Install `channel` as the session, closing whichever session loses.
    ///
    /// Two sessions with the same peer dialled in opposite directions are a
    /// simultaneous dial: the one dialled by the lower id wins on both ends.
    /// Any other overlap is resolved in favour of the newer session.
    fn adopt(&mut self, channel: DataChannel, outbound: bool) -> bool {
        if let (Some(current), Some(local)) = (self.channel.as_ref(), self.local_id.as_ref()) {
            if current.peer() == channel.peer() && self.outbound != outbound {
                let keep_outbound = local < channel.peer();
                if self.outbound == keep_outbound {
                    debug!(peer = %channel.peer().short(), outbound, "simultaneous dial, keeping existing session");
                    channel.close();
                    return false;
                }
                debug!(peer = %channel.peer().short(), outbound, "simultaneous dial, switching to this session");
            }
        }

        if let Some(previous) = self.channel.replace(channel) {
            warn!(peer = %previous.peer().short(), "replacing existing session");
            previous.close();
        }
        self.outbound = outbound;
        self.remote_peer = None;
        self.state = SessionState::Connecting;
        true
    }

    fn drop_session(&mut self) {
        self.channel = None;
        self.outbound = false;
        self.remote_peer = None;
        self.state = SessionState::Disconnected;
    }

    fn state_for_open_channel(&self) -> SessionState {
        if self.remote_peer.is_some() {
            SessionState::Connected
        } else {
            SessionState::Connecting
        }
    }
}

async fn next_substrate_event(
    registration: &mut Option<mpsc::UnboundedReceiver<SubstrateEvent>>,
) -> Option<SubstrateEvent> {
    match registration {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_channel_event(channel: &mut Option<DataChannel>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::memory::MemoryBroker;

    fn manager(broker: &MemoryBroker) -> ConnectionManager {
        ConnectionManager::new(Arc::new(broker.clone()))
    }

    async fn connected_pair(broker: &MemoryBroker) -> (ConnectionManager, ConnectionManager) {
        let mut a = manager(broker);
        let mut b = manager(broker);
        a.acquire_identity(None).await.unwrap();
        let b_id = b.acquire_identity(None).await.unwrap().id;

        assert!(a.connect_to_peer(&b_id).await);
        assert_eq!(a.state(), SessionState::Connecting);
        assert!(matches!(a.next_event().await, ConnectionEvent::Connected(_)));
        assert!(matches!(b.next_event().await, ConnectionEvent::Incoming(_)));
        assert!(matches!(b.next_event().await, ConnectionEvent::Connected(_)));
        (a, b)
    }

    #[tokio::test]
    async fn fresh_identity_moves_to_idle() {
        let broker = MemoryBroker::new();
        let mut m = manager(&broker);
        assert_eq!(m.state(), SessionState::Uninitialized);

        let outcome = m.acquire_identity(None).await.unwrap();
        assert!(!outcome.discarded_stale);
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(m.local_id(), Some(&outcome.id));
        assert!(!m.status().loading);
    }

    #[tokio::test]
    async fn persisted_identity_is_reused() {
        let broker = MemoryBroker::new();
        let mut m = manager(&broker);
        let outcome = m.acquire_identity(Some("alice".into())).await.unwrap();
        assert_eq!(outcome.id, PeerId::new("alice"));
        assert!(!outcome.discarded_stale);
    }

    #[tokio::test]
    async fn claimed_identity_is_discarded() {
        let broker = MemoryBroker::new();
        let mut other_tab = manager(&broker);
        other_tab.acquire_identity(Some("alice".into())).await.unwrap();

        let mut m = manager(&broker);
        let outcome = m.acquire_identity(Some("alice".into())).await.unwrap();
        assert!(outcome.discarded_stale);
        assert_ne!(outcome.id, PeerId::new("alice"));
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn unreachable_substrate_is_reported() {
        let broker = MemoryBroker::new();
        broker.set_offline(true);
        let mut m = manager(&broker);

        assert!(m.acquire_identity(None).await.is_err());
        let status = m.status();
        assert!(status.error.is_some());
        assert!(!status.loading);
        assert!(!status.connected);
        assert_eq!(status.state, SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn connect_is_noop_without_identity_or_to_self() {
        let broker = MemoryBroker::new();
        let mut m = manager(&broker);
        assert!(!m.connect_to_peer(&"bob".into()).await);

        let me = m.acquire_identity(None).await.unwrap().id;
        assert!(!m.connect_to_peer(&me).await);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(broker.connect_attempts().is_empty());
    }

    #[tokio::test]
    async fn session_opens_on_both_sides() {
        let broker = MemoryBroker::new();
        let (a, b) = connected_pair(&broker).await;

        assert!(a.is_connected());
        assert!(b.is_connected());
        assert_eq!(a.remote_peer(), b.local_id());
        assert_eq!(b.remote_peer(), a.local_id());
    }

    #[tokio::test]
    async fn data_and_close_are_reported() {
        let broker = MemoryBroker::new();
        let (mut a, mut b) = connected_pair(&broker).await;

        assert!(a.send(Bytes::from_static(b"hello")));
        match b.next_event().await {
            ConnectionEvent::Data { from, payload } => {
                assert_eq!(Some(&from), a.local_id());
                assert_eq!(payload, Bytes::from_static(b"hello"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        a.reset().await;
        assert!(matches!(b.next_event().await, ConnectionEvent::Disconnected(_)));
        assert_eq!(b.state(), SessionState::Disconnected);
        assert!(b.remote_peer().is_none());
        assert!(b.local_id().is_some());
        assert!(!b.send(Bytes::from_static(b"lost")));
    }

    #[tokio::test]
    async fn failed_connect_surfaces_error() {
        let broker = MemoryBroker::new();
        let mut m = manager(&broker);
        m.acquire_identity(None).await.unwrap();

        assert!(!m.connect_to_peer(&"ghost".into()).await);
        let status = m.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(status.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn newer_inbound_session_replaces_older() {
        let broker = MemoryBroker::new();
        let mut target = manager(&broker);
        let target_id = target.acquire_identity(None).await.unwrap().id;

        let mut first = manager(&broker);
        let mut second = manager(&broker);
        first.acquire_identity(None).await.unwrap();
        second.acquire_identity(None).await.unwrap();

        first.connect_to_peer(&target_id).await;
        assert!(matches!(target.next_event().await, ConnectionEvent::Incoming(_)));
        second.connect_to_peer(&target_id).await;

        let second_id = second.local_id().cloned().unwrap();
        loop {
            if let ConnectionEvent::Connected(peer) = target.next_event().await {
                if peer == second_id {
                    break;
                }
            }
        }
        assert_eq!(target.remote_peer(), Some(&second_id));

        // The replaced session was closed from the target side.
        loop {
            if let ConnectionEvent::Disconnected(_) = first.next_event().await {
                break;
            }
        }
        assert!(!first.is_connected());
    }

    /// Drive both managers until neither has anything left to process.
    async fn settle(a: &mut ConnectionManager, b: &mut ConnectionManager) {
        let quiet = Duration::from_millis(50);
        loop {
            let a_busy = tokio::time::timeout(quiet, a.next_event()).await.is_ok();
            let b_busy = tokio::time::timeout(quiet, b.next_event()).await.is_ok();
            if !a_busy && !b_busy {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_dials_converge_on_one_session() {
        let broker = MemoryBroker::new();
        let mut alice = manager(&broker);
        let mut bob = manager(&broker);
        let alice_id = alice.acquire_identity(Some("alice".into())).await.unwrap().id;
        let bob_id = bob.acquire_identity(Some("bob".into())).await.unwrap().id;

        assert!(alice.connect_to_peer(&bob_id).await);
        assert!(bob.connect_to_peer(&alice_id).await);
        settle(&mut alice, &mut bob).await;

        assert!(alice.is_connected());
        assert!(bob.is_connected());
        assert_eq!(alice.remote_peer(), Some(&bob_id));
        assert_eq!(bob.remote_peer(), Some(&alice_id));

        // The surviving session is the one alice dialled, and it carries data.
        assert!(bob.send(Bytes::from_static(b"ping")));
        match alice.next_event().await {
            ConnectionEvent::Data { from, payload } => {
                assert_eq!(from, bob_id);
                assert_eq!(payload, Bytes::from_static(b"ping"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_dials_converge_when_inbound_is_seen_first() {
        let broker = MemoryBroker::new();
        let mut alice = manager(&broker);
        let mut bob = manager(&broker);
        let alice_id = alice.acquire_identity(Some("alice".into())).await.unwrap().id;
        let bob_id = bob.acquire_identity(Some("bob".into())).await.unwrap().id;

        // Bob's dial lands first and alice adopts it before dialling back.
        assert!(bob.connect_to_peer(&alice_id).await);
        assert!(matches!(alice.next_event().await, ConnectionEvent::Incoming(_)));
        assert!(alice.connect_to_peer(&bob_id).await);
        settle(&mut alice, &mut bob).await;

        assert!(alice.is_connected());
        assert!(bob.is_connected());
        assert!(alice.send(Bytes::from_static(b"pong")));
        assert!(matches!(bob.next_event().await, ConnectionEvent::Data { .. }));
    }

    #[tokio::test]
    async fn substrate_error_drops_an_open_session() {
        let broker = MemoryBroker::new();
        let (mut a, mut b) = connected_pair(&broker).await;
        let a_id = a.local_id().cloned().unwrap();

        broker.inject_error(&a_id, SubstrateError::Transport("ice failed".into()));
        assert!(matches!(a.next_event().await, ConnectionEvent::Error(_)));

        let status = a.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(!status.connected);
        assert!(status.remote_peer.is_none());
        assert!(status.error.unwrap().contains("ice failed"));
        assert!(!a.has_session());
        assert!(!a.send(Bytes::from_static(b"lost")));

        assert!(matches!(b.next_event().await, ConnectionEvent::Disconnected(_)));
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn substrate_error_while_idle_keeps_identity() {
        let broker = MemoryBroker::new();
        let mut m = manager(&broker);
        let me = m.acquire_identity(None).await.unwrap().id;

        broker.inject_error(&me, SubstrateError::Transport("glitch".into()));
        assert!(matches!(m.next_event().await, ConnectionEvent::Error(_)));
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(m.local_id(), Some(&me));
        assert!(m.status().error.is_some());
    }

    #[tokio::test]
    async fn begin_identity_reports_loading() {
        let broker = MemoryBroker::new();
        let mut m = manager(&broker);
        m.begin_identity();
        assert!(m.status().loading);
        assert_eq!(m.state(), SessionState::AcquiringIdentity);

        m.acquire_identity(None).await.unwrap();
        assert!(!m.status().loading);
    }
}
