//! The conversation orchestrator and its event loop.
//!
//! One task owns a [`ChatClient`] and with it every piece of mutable state:
//! the log, the display handles, the pending snapshot write and the session.
//! Commands come in over an mpsc channel from [`ChatHandle`]s, changes go out
//! as [`ChatNotification`]s. Each command or event is handled to completion
//! before the next one is looked at.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tandem_net::{ConnectionEvent, ConnectionManager, ConnectionStatus, Substrate};
use tandem_shared::constants::{IDENTITY_RETRY_MAX_MS, MAX_ATTACHMENT_SIZE};
use tandem_shared::{
    Attachment, AttachmentData, Message, MessageId, PeerId, ReactionAction, Reactions,
    WireMessage, WirePayload,
};
use tandem_store::Database;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::deep_link;
use crate::error::ClientError;
use crate::handles::DisplayHandles;
use crate::log::MessageLog;
use crate::persistence::Persistence;
use crate::reactions::{self, Toggled};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A file picked or pasted by the user.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    /// Size reported by the source, checked against the attachment limit.
    pub size: u64,
    pub bytes: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }
}

/// Short description of the message a reply points at.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPreview {
    pub id: MessageId,
    pub sender_id: PeerId,
    pub excerpt: String,
}

/// A message as the presentation layer shows it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    /// `None` for messages that are not replies and for dangling replies.
    pub reply: Option<ReplyPreview>,
    pub outgoing: bool,
}

impl MessageView {
    fn new(message: &Message, log: &MessageLog, local_id: Option<&PeerId>) -> Self {
        let reply = log.reply_context(message).map(|target| ReplyPreview {
            id: target.id,
            sender_id: target.sender_id.clone(),
            excerpt: excerpt(target),
        });
        Self {
            message: message.clone(),
            reply,
            outgoing: local_id == Some(&message.sender_id),
        }
    }
}

fn excerpt(message: &Message) -> String {
    const MAX_CHARS: usize = 80;

    let text = match (&message.content, &message.attachment) {
        (Some(content), _) if !content.trim().is_empty() => content.trim(),
        (_, Some(attachment)) => attachment.name.as_str(),
        _ => "",
    };
    match text.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Commands sent *to* the client task.
#[derive(Debug)]
pub enum ChatCommand {
    SendText {
        text: String,
        reply_to: Option<MessageId>,
        reply: oneshot::Sender<Result<MessageId, ClientError>>,
    },
    SendFile {
        file: OutgoingFile,
        caption: Option<String>,
        reply_to: Option<MessageId>,
        reply: oneshot::Sender<Result<MessageId, ClientError>>,
    },
    /// Toggle the local identity's reaction and broadcast it.
    ToggleReaction { message_id: MessageId, emoji: String },
    ConnectToPeer(PeerId),
    OpenDeepLink {
        link: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    /// Start a new conversation under a fresh identity.
    Clear(oneshot::Sender<Result<(), ClientError>>),
    Snapshot(oneshot::Sender<Vec<MessageView>>),
    Status(oneshot::Sender<ConnectionStatus>),
    ShareLink(oneshot::Sender<Option<Url>>),
    /// Write any pending snapshot and stop the task.
    Shutdown(oneshot::Sender<()>),
}

/// Notifications sent *from* the client task.
#[derive(Debug, Clone)]
pub enum ChatNotification {
    MessageAppended(MessageView),
    ReactionsChanged {
        message_id: MessageId,
        reactions: Reactions,
    },
    StatusChanged(ConnectionStatus),
    ConversationCleared,
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

enum Wake {
    Connection(ConnectionEvent),
    Reconnect,
    IdentityRetry,
    Persist,
}

struct PendingReconnect {
    at: Instant,
    peer: PeerId,
}

pub struct ChatClient {
    config: ClientConfig,
    connection: ConnectionManager,
    log: MessageLog,
    handles: DisplayHandles,
    persistence: Persistence,
    /// Deep-link target received before an identity was available.
    pending_target: Option<PeerId>,
    reconnect: Option<PendingReconnect>,
    /// Next identity acquisition attempt after a failure or a lost registration.
    identity_retry: Option<Instant>,
    retry_backoff: Duration,
    notifications: Option<mpsc::UnboundedSender<ChatNotification>>,
}

impl ChatClient {
    /// Build a client over an open database. The stored conversation is
    /// loaded and hydrated immediately; nothing touches the substrate until
    /// [`ChatClient::start`].
    pub fn new(config: ClientConfig, db: Database, substrate: Arc<dyn Substrate>) -> Self {
        let persistence = Persistence::new(db, config.persist_debounce);
        let mut handles = DisplayHandles::new();
        let log = persistence.load(&mut handles);

        Self {
            retry_backoff: config.reconnect_delay,
            config,
            connection: ConnectionManager::new(substrate),
            log,
            handles,
            persistence,
            pending_target: None,
            reconnect: None,
            identity_retry: None,
            notifications: None,
        }
    }

    /// Open the database named by `config` (or the platform default) and
    /// build a client over it.
    pub fn open(config: ClientConfig, substrate: Arc<dyn Substrate>) -> Result<Self, ClientError> {
        let db = match &config.database_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(Self::new(config, db, substrate))
    }

    /// Acquire an identity, reusing the stored one when it is still free.
    ///
    /// Afterwards a deep-link target received in the meantime is dialled, or
    /// failing that a single reconnect to the last peer is scheduled. On
    /// failure another attempt is scheduled with a doubling delay.
    pub async fn start(&mut self) -> Result<PeerId, ClientError> {
        let persisted = self.persistence.local_peer_id();
        self.identity_retry = None;
        self.connection.begin_identity();
        self.notify_status();

        let outcome = match self.connection.acquire_identity(persisted).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.schedule_identity_retry();
                self.notify_status();
                return Err(e.into());
            }
        };
        self.retry_backoff = self.config.reconnect_delay;

        if outcome.discarded_stale {
            self.persistence.forget_local_peer();
        }
        self.persistence.remember_local_peer(&outcome.id);
        self.notify_status();

        if let Some(target) = self.pending_target.take() {
            self.connect_to_peer(&target).await;
        } else if !self.connection.has_session() {
            if let Some(peer) = self.persistence.last_peer().filter(|p| *p != outcome.id) {
                debug!(peer = %peer.short(), delay_ms = self.config.reconnect_delay.as_millis() as u64, "reconnect scheduled");
                self.reconnect = Some(PendingReconnect {
                    at: Instant::now() + self.config.reconnect_delay,
                    peer,
                });
            }
        }

        Ok(outcome.id)
    }

    pub async fn connect_to_peer(&mut self, peer: &PeerId) {
        self.connection.connect_to_peer(peer).await;
        self.notify_status();
    }

    /// Dial the peer named by a share link, unless already connected or the
    /// link names ourselves. Before an identity exists the target is kept and
    /// dialled once [`ChatClient::start`] succeeds.
    pub async fn open_deep_link(&mut self, link: &str) -> Result<(), ClientError> {
        let Some(target) = deep_link::target_peer(link)? else {
            return Ok(());
        };

        if self.connection.is_connected() {
            debug!(peer = %target.short(), "deep link ignored, already connected");
            return Ok(());
        }
        match self.connection.local_id().cloned() {
            None => {
                debug!(peer = %target.short(), "deep link kept until an identity is acquired");
                self.pending_target = Some(target);
            }
            Some(local) if local == target => {
                debug!("deep link names ourselves");
            }
            Some(_) => self.connect_to_peer(&target).await,
        }
        Ok(())
    }

    pub fn send_text(
        &mut self,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let sender = self.local_identity()?;
        Ok(self.publish(Message::text(sender, text.to_string(), reply_to)))
    }

    pub fn send_file(
        &mut self,
        file: OutgoingFile,
        caption: Option<String>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ClientError> {
        if file.size > MAX_ATTACHMENT_SIZE {
            return Err(ClientError::AttachmentTooLarge {
                size: file.size,
                max: MAX_ATTACHMENT_SIZE,
            });
        }
        let sender = self.local_identity()?;

        let mut attachment = Attachment::from_bytes(file.name, file.mime_type, file.bytes.clone());
        attachment.size = file.size;
        attachment.url = Some(self.handles.issue(file.bytes));

        let caption = caption.filter(|c| !c.trim().is_empty());
        Ok(self.publish(Message::with_attachment(sender, attachment, caption, reply_to)))
    }

    /// Flip a reaction. Local toggles (`should_broadcast`) act as the local
    /// identity and are forwarded to the peer; remote ones act as the peer.
    pub fn toggle_reaction(&mut self, message_id: &MessageId, emoji: &str, should_broadcast: bool) {
        let actor = if should_broadcast {
            match self.connection.local_id() {
                Some(id) => id.clone(),
                None => {
                    debug!("reaction ignored, no identity yet");
                    return;
                }
            }
        } else {
            reactions::remote_actor(self.connection.remote_peer())
        };

        let Some(Toggled {
            message_id,
            reactions,
            ..
        }) = reactions::toggle_reaction(&mut self.log, message_id, emoji, &actor)
        else {
            return;
        };

        if should_broadcast && self.connection.is_connected() {
            self.transmit(&WirePayload::Reaction(ReactionAction {
                message_id,
                emoji: emoji.to_string(),
            }));
        }

        self.persistence.schedule();
        self.notify(ChatNotification::ReactionsChanged {
            message_id,
            reactions,
        });
    }

    /// Start a new conversation: drop the session, the log and everything
    /// stored, then acquire a fresh identity.
    pub async fn clear_conversation(&mut self) -> Result<(), ClientError> {
        info!(messages = self.log.len(), "starting a new conversation");

        self.persistence.cancel();
        self.reconnect = None;
        self.identity_retry = None;
        self.pending_target = None;
        self.log.clear();
        self.handles.revoke_all();
        self.connection.reset().await;

        let erased = self.persistence.erase_all();
        self.notify(ChatNotification::ConversationCleared);
        self.notify_status();
        erased?;

        self.start().await?;
        Ok(())
    }

    /// Wait for the next session event or timer and handle it.
    pub async fn process_next(&mut self) {
        let wake = self.wait().await;
        self.handle_wake(wake).await;
    }

    /// Spawn the client on the current runtime.
    ///
    /// The task starts by acquiring an identity, then serves commands until
    /// [`ChatCommand::Shutdown`] arrives or every handle is dropped.
    pub fn spawn(mut self) -> (ChatHandle, mpsc::UnboundedReceiver<ChatNotification>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ChatCommand>(256);
        let (notif_tx, notif_rx) = mpsc::unbounded_channel::<ChatNotification>();
        self.notifications = Some(notif_tx);

        tokio::spawn(async move {
            self.run(cmd_rx).await;
        });

        (ChatHandle { commands: cmd_tx }, notif_rx)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ChatCommand>) {
        if let Err(e) = self.start().await {
            warn!(error = %e, "could not acquire an identity");
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => {
                            info!("command channel closed, shutting down chat client");
                            self.shutdown().await;
                            break;
                        }
                    }
                }
                wake = self.wait() => self.handle_wake(wake).await,
            }
        }

        info!("chat client event loop terminated");
    }

    /// Returns `false` once the loop should stop.
    async fn handle_command(&mut self, cmd: ChatCommand) -> bool {
        match cmd {
            ChatCommand::SendText {
                text,
                reply_to,
                reply,
            } => {
                let _ = reply.send(self.send_text(&text, reply_to));
            }
            ChatCommand::SendFile {
                file,
                caption,
                reply_to,
                reply,
            } => {
                let _ = reply.send(self.send_file(file, caption, reply_to));
            }
            ChatCommand::ToggleReaction { message_id, emoji } => {
                self.toggle_reaction(&message_id, &emoji, true);
            }
            ChatCommand::ConnectToPeer(peer) => self.connect_to_peer(&peer).await,
            ChatCommand::OpenDeepLink { link, reply } => {
                let result = self.open_deep_link(&link).await;
                let _ = reply.send(result);
            }
            ChatCommand::Clear(reply) => {
                let result = self.clear_conversation().await;
                let _ = reply.send(result);
            }
            ChatCommand::Snapshot(reply) => {
                let _ = reply.send(self.views());
            }
            ChatCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            ChatCommand::ShareLink(reply) => {
                let _ = reply.send(self.share_link());
            }
            ChatCommand::Shutdown(ack) => {
                info!("chat client shutdown requested");
                self.shutdown().await;
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    async fn wait(&mut self) -> Wake {
        let reconnect_at = self.reconnect.as_ref().map(|r| r.at);
        let persist_at = self.persistence.deadline();

        tokio::select! {
            event = self.connection.next_event() => Wake::Connection(event),
            _ = sleep_until(reconnect_at) => Wake::Reconnect,
            _ = sleep_until(self.identity_retry) => Wake::IdentityRetry,
            _ = sleep_until(persist_at) => Wake::Persist,
        }
    }

    async fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Connection(event) => self.on_connection_event(event),
            Wake::Reconnect => {
                let Some(PendingReconnect { peer, .. }) = self.reconnect.take() else {
                    return;
                };
                if self.connection.has_session() {
                    debug!(peer = %peer.short(), "reconnect skipped, session already exists");
                    return;
                }
                info!(peer = %peer, "reconnecting to last peer");
                self.connect_to_peer(&peer).await;
            }
            Wake::IdentityRetry => {
                info!("retrying identity acquisition");
                if let Err(e) = self.start().await {
                    warn!(error = %e, "identity retry failed");
                }
            }
            Wake::Persist => {
                self.persistence.flush(&self.log);
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(peer) => {
                self.reconnect = None;
                self.persistence.remember_last_peer(&peer);
                self.notify_status();
            }
            ConnectionEvent::Data { from, payload } => self.on_payload(&from, &payload),
            ConnectionEvent::RegistrationLost => {
                self.schedule_identity_retry();
                self.notify_status();
            }
            ConnectionEvent::Incoming(_)
            | ConnectionEvent::Disconnected(_)
            | ConnectionEvent::Error(_) => self.notify_status(),
        }
    }

    fn on_payload(&mut self, from: &PeerId, payload: &[u8]) {
        let payload = match WirePayload::from_bytes(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %from.short(), error = %e, len = payload.len(), "ignoring undecodable payload");
                return;
            }
        };

        match payload {
            WirePayload::Message(wire) => {
                let mut message = wire.into_message();
                if let Some(attachment) = message.attachment.as_mut() {
                    if let AttachmentData::Binary(bytes) = &attachment.data {
                        if !bytes.is_empty() {
                            attachment.url = Some(self.handles.issue(bytes.clone()));
                        }
                    }
                }
                debug!(peer = %from.short(), message = %message.id, "message received");
                self.append(message);
            }
            WirePayload::Reaction(action) => {
                self.toggle_reaction(&action.message_id, &action.emoji, false);
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.persistence.deadline().is_some() {
            self.persistence.flush(&self.log);
        }
        self.connection.reset().await;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn handles(&self) -> &DisplayHandles {
        &self.handles
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn views(&self) -> Vec<MessageView> {
        let local = self.connection.local_id();
        self.log
            .iter()
            .map(|m| MessageView::new(m, &self.log, local))
            .collect()
    }

    /// Link the other participant opens to connect to us.
    pub fn share_link(&self) -> Option<Url> {
        self.connection
            .local_id()
            .map(|id| deep_link::share_link(&self.config.share_base_url, id))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn schedule_identity_retry(&mut self) {
        const FLOOR: Duration = Duration::from_millis(50);

        let delay = self.retry_backoff;
        debug!(delay_ms = delay.as_millis() as u64, "identity retry scheduled");
        self.identity_retry = Some(Instant::now() + delay);
        self.retry_backoff = (delay * 2)
            .max(FLOOR)
            .min(Duration::from_millis(IDENTITY_RETRY_MAX_MS));
    }

    fn local_identity(&self) -> Result<PeerId, ClientError> {
        self.connection.local_id().cloned().ok_or(ClientError::NoIdentity)
    }

    /// Append a locally authored message and forward it when connected. The
    /// message stays in the log whether or not it could be sent.
    fn publish(&mut self, message: Message) -> MessageId {
        if self.connection.is_connected() {
            self.transmit(&WirePayload::Message(WireMessage::from(&message)));
        } else {
            debug!(message = %message.id, "not connected, message kept locally");
        }
        let id = message.id;
        self.append(message);
        id
    }

    fn transmit(&self, payload: &WirePayload) {
        match payload.to_bytes() {
            Ok(bytes) => {
                if !self.connection.send(Bytes::from(bytes)) {
                    debug!("payload not delivered, session unavailable");
                }
            }
            Err(e) => warn!(error = %e, "could not encode payload"),
        }
    }

    fn append(&mut self, message: Message) {
        let view = MessageView::new(&message, &self.log, self.connection.local_id());
        self.log.append(message);
        self.persistence.schedule();
        self.notify(ChatNotification::MessageAppended(view));
    }

    fn notify_status(&self) {
        self.notify(ChatNotification::StatusChanged(self.status()));
    }

    fn notify(&self, notification: ChatNotification) {
        if let Some(tx) = &self.notifications {
            let _ = tx.send(notification);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// ChatHandle
// ---------------------------------------------------------------------------

/// Cloneable front door to a spawned [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<ChatCommand>,
}

impl ChatHandle {
    pub async fn send_text(
        &self,
        text: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ChatCommand::SendText {
                text: text.into(),
                reply_to,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn send_file(
        &self,
        file: OutgoingFile,
        caption: Option<String>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ChatCommand::SendFile {
                file,
                caption,
                reply_to,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn toggle_reaction(
        &self,
        message_id: MessageId,
        emoji: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.post(ChatCommand::ToggleReaction {
            message_id,
            emoji: emoji.into(),
        })
        .await
    }

    pub async fn connect_to_peer(&self, peer: PeerId) -> Result<(), ClientError> {
        self.post(ChatCommand::ConnectToPeer(peer)).await
    }

    pub async fn open_deep_link(&self, link: impl Into<String>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ChatCommand::OpenDeepLink {
                link: link.into(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ChatCommand::Clear(reply), rx).await?
    }

    pub async fn snapshot(&self) -> Result<Vec<MessageView>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ChatCommand::Snapshot(reply), rx).await
    }

    pub async fn status(&self) -> Result<ConnectionStatus, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ChatCommand::Status(reply), rx).await
    }

    pub async fn share_link(&self) -> Result<Option<Url>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ChatCommand::ShareLink(reply), rx).await
    }

    /// Stop the client, waiting until any pending snapshot has been written.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (ack, rx) = oneshot::channel();
        self.request(ChatCommand::Shutdown(ack), rx).await
    }

    async fn post(&self, cmd: ChatCommand) -> Result<(), ClientError> {
        self.commands.send(cmd).await.map_err(|_| ClientError::Closed)
    }

    async fn request<T>(&self, cmd: ChatCommand, rx: oneshot::Receiver<T>) -> Result<T, ClientError> {
        self.post(cmd).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}
