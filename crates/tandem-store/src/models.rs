//! Snapshot records persisted as JSON under the messages key.
//!
//! These mirror the live [`Message`] model with the attachment payload in its
//! text form. Display handles have no field here, so they can never be
//! written.

use serde::{Deserialize, Serialize};

use tandem_shared::codec::{self, StorageEncoding};
use tandem_shared::{
    Attachment, AttachmentData, AttachmentId, Message, MessageId, MessageKind, PeerId, Reactions,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender_id: PeerId,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<StoredAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub reactions: Reactions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttachment {
    pub id: AttachmentId,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Base64 payload, empty when the file was too large to keep.
    #[serde(default)]
    pub data: String,
}

impl StoredMessage {
    /// Build the storable form of a live message, applying the attachment
    /// size policy. The live message is left untouched.
    pub fn from_live(message: &Message) -> Self {
        let mut content = message.content.clone();

        let attachment = message.attachment.as_ref().map(|attachment| {
            let data = match codec::encode_for_storage(attachment) {
                StorageEncoding::Encoded(text) => text,
                StorageEncoding::Expired => {
                    content = Some(codec::with_expired_suffix(content.as_deref()));
                    String::new()
                }
            };
            StoredAttachment {
                id: attachment.id,
                name: attachment.name.clone(),
                size: attachment.size,
                mime_type: attachment.mime_type.clone(),
                data,
            }
        });

        Self {
            id: message.id,
            sender_id: message.sender_id.clone(),
            timestamp: message.timestamp,
            kind: message.kind,
            content,
            attachment,
            reply_to: message.reply_to,
            reactions: message.reactions.clone(),
        }
    }

    /// Live message with the attachment still in its encoded form. Hydration
    /// turns it back into bytes.
    pub fn into_live(self) -> Message {
        Message {
            id: self.id,
            sender_id: self.sender_id,
            timestamp: self.timestamp,
            kind: self.kind,
            content: self.content,
            attachment: self.attachment.map(|a| Attachment {
                id: a.id,
                name: a.name,
                size: a.size,
                mime_type: a.mime_type,
                data: AttachmentData::Encoded(a.data),
                url: None,
            }),
            reply_to: self.reply_to,
            reactions: self.reactions.normalized(),
        }
    }
}
