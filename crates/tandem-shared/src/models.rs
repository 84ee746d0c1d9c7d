//! The conversation model.
//!
//! A [`Message`] never changes after creation except for its [`Reactions`].
//! Attachment bytes live either in binary form (live session, wire) or as
//! base64 text (snapshot); [`AttachmentData`] makes the active form explicit.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{AttachmentId, MessageId, PeerId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    /// Kind of a message carrying an attachment with the given MIME type.
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: PeerId,
    /// Milliseconds since the Unix epoch, as reported by the author.
    pub timestamp: i64,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    pub reactions: Reactions,
}

impl Message {
    pub fn text(sender_id: PeerId, content: String, reply_to: Option<MessageId>) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            timestamp: now_millis(),
            kind: MessageKind::Text,
            content: Some(content),
            attachment: None,
            reply_to,
            reactions: Reactions::default(),
        }
    }

    pub fn with_attachment(
        sender_id: PeerId,
        attachment: Attachment,
        caption: Option<String>,
        reply_to: Option<MessageId>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            timestamp: now_millis(),
            kind: MessageKind::for_mime(&attachment.mime_type),
            content: caption,
            attachment: Some(attachment),
            reply_to,
            reactions: Reactions::default(),
        }
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// The single authoritative representation of an attachment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    /// Raw bytes, used in the live session and on the wire.
    Binary(Bytes),
    /// Base64 text, used in the persisted snapshot. Empty when the payload
    /// was too large to keep.
    Encoded(String),
}

impl AttachmentData {
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Encoded(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Binary(bytes) => bytes.is_empty(),
            Self::Encoded(text) => text.is_empty(),
        }
    }
}

/// Process-local reference used to display attachment bytes. Never leaves the
/// process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DisplayUrl(String);

impl DisplayUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DisplayUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub name: String,
    /// Size in bytes as reported by the source.
    pub size: u64,
    pub mime_type: String,
    pub data: AttachmentData,
    pub url: Option<DisplayUrl>,
}

impl Attachment {
    pub fn from_bytes(name: String, mime_type: String, bytes: Bytes) -> Self {
        Self {
            id: AttachmentId::new(),
            name,
            size: bytes.len() as u64,
            mime_type,
            data: AttachmentData::Binary(bytes),
            url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// Emoji to the identities who applied it. An emoji without reactors has no
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, BTreeSet<PeerId>>);

impl Reactions {
    /// Flip `who`'s reaction with `emoji`. Returns `true` when the reaction
    /// was added, `false` when it was removed.
    pub fn toggle(&mut self, emoji: &str, who: &PeerId) -> bool {
        let reactors = self.0.entry(emoji.to_string()).or_default();
        let added = if reactors.remove(who) {
            false
        } else {
            reactors.insert(who.clone());
            true
        };
        if reactors.is_empty() {
            self.0.remove(emoji);
        }
        added
    }

    pub fn reactors(&self, emoji: &str) -> Option<&BTreeSet<PeerId>> {
        self.0.get(emoji)
    }

    pub fn count(&self, emoji: &str) -> usize {
        self.0.get(emoji).map_or(0, BTreeSet::len)
    }

    pub fn has_any(&self) -> bool {
        !self.0.is_empty()
    }

    /// Drop emoji entries with no reactors. Used on data from outside the
    /// process, where an empty set may have slipped through.
    pub fn normalized(mut self) -> Self {
        self.0.retain(|_, reactors| !reactors.is_empty());
        self
    }
}
