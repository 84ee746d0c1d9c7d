//! Debounced snapshot writes and startup hydration.
//!
//! Storage failures never reach the caller: they are logged and the state in
//! memory stays authoritative until the next successful write.

use std::time::Duration;

use tandem_shared::codec;
use tandem_shared::{AttachmentData, Message, PeerId};
use tandem_store::{Database, StoredMessage};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::handles::DisplayHandles;
use crate::log::MessageLog;

pub struct Persistence {
    db: Database,
    debounce: Duration,
    deadline: Option<Instant>,
}

impl Persistence {
    pub fn new(db: Database, debounce: Duration) -> Self {
        Self {
            db,
            debounce,
            deadline: None,
        }
    }

    /// (Re)arm the single pending write. Any earlier deadline is replaced.
    pub fn schedule(&mut self) {
        self.deadline = Some(Instant::now() + self.debounce);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Write the snapshot now and disarm the pending write. An empty log is
    /// not written. Returns whether a snapshot was stored.
    pub fn flush(&mut self, log: &MessageLog) -> bool {
        self.deadline = None;
        if log.is_empty() {
            return false;
        }

        let stored: Vec<StoredMessage> = log.iter().map(StoredMessage::from_live).collect();
        match self.db.save_snapshot(&stored) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, count = stored.len(), "snapshot write failed, dropping this cycle");
                false
            }
        }
    }

    /// Read the stored snapshot and hydrate its attachments.
    pub fn load(&self, handles: &mut DisplayHandles) -> MessageLog {
        let stored = self.db.load_snapshot().unwrap_or_else(|e| {
            warn!(error = %e, "could not read snapshot, starting empty");
            Vec::new()
        });

        let mut messages: Vec<Message> = stored.into_iter().map(StoredMessage::into_live).collect();
        let failed = hydrate(&mut messages, handles);
        info!(count = messages.len(), failed, "conversation restored");

        MessageLog::from_messages(messages)
    }

    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.db.local_peer_id().unwrap_or_else(|e| {
            warn!(error = %e, "could not read stored identity");
            None
        })
    }

    pub fn remember_local_peer(&self, id: &PeerId) {
        if let Err(e) = self.db.set_local_peer_id(id) {
            warn!(error = %e, "could not store identity");
        }
    }

    pub fn forget_local_peer(&self) {
        if let Err(e) = self.db.clear_local_peer_id() {
            warn!(error = %e, "could not erase stale identity");
        }
    }

    pub fn last_peer(&self) -> Option<PeerId> {
        self.db.last_peer_id().unwrap_or_else(|e| {
            warn!(error = %e, "could not read last peer");
            None
        })
    }

    pub fn remember_last_peer(&self, id: &PeerId) {
        if let Err(e) = self.db.set_last_peer_id(id) {
            warn!(error = %e, "could not store last peer");
        }
    }

    /// Cancel the pending write and erase the snapshot and both identifiers.
    pub fn erase_all(&mut self) -> tandem_store::Result<()> {
        self.cancel();
        self.db.clear_conversation()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Decode every stored attachment payload back to bytes and issue it a
/// display handle. Returns the number of payloads that could not be decoded;
/// those stay encoded and without a handle.
pub fn hydrate(messages: &mut [Message], handles: &mut DisplayHandles) -> usize {
    let mut failed = 0;

    for message in messages.iter_mut() {
        let Some(attachment) = message.attachment.as_mut() else {
            continue;
        };
        if attachment.url.is_some() {
            continue;
        }
        let AttachmentData::Encoded(text) = &attachment.data else {
            continue;
        };

        match codec::decode(text) {
            Ok(Some(bytes)) => {
                attachment.url = Some(handles.issue(bytes.clone()));
                attachment.data = AttachmentData::Binary(bytes);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(message = %message.id, attachment = %attachment.name, error = %e, "attachment could not be restored");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        debug!(handles = handles.len(), "hydration complete");
    }
    failed
}
