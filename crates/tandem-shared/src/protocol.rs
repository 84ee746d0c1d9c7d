use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::ProtocolError;
use crate::models::{Attachment, AttachmentData, Message, MessageKind, Reactions};
use crate::types::{AttachmentId, MessageId, PeerId};

/// Everything exchanged between the two peers over the data channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WirePayload {
    /// A chat message, attachment included
    Message(WireMessage),

    /// Toggle of one reaction by the sending peer
    Reaction(ReactionAction),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub id: MessageId,
    pub sender_id: PeerId,
    pub timestamp: i64,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub attachment: Option<WireAttachment>,
    pub reply_to: Option<MessageId>,
    pub reactions: Reactions,
}

/// Attachment as transmitted: raw bytes, no display handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireAttachment {
    pub id: AttachmentId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionAction {
    pub message_id: MessageId,
    pub emoji: String,
}

impl WirePayload {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(bincode::deserialize(data)?)
    }
}

impl From<&Attachment> for WireAttachment {
    fn from(attachment: &Attachment) -> Self {
        let data = match &attachment.data {
            AttachmentData::Binary(bytes) => bytes.clone(),
            AttachmentData::Encoded(text) => codec::decode(text).ok().flatten().unwrap_or_default(),
        };
        Self {
            id: attachment.id,
            name: attachment.name.clone(),
            size: attachment.size,
            mime_type: attachment.mime_type.clone(),
            data,
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id.clone(),
            timestamp: message.timestamp,
            kind: message.kind,
            content: message.content.clone(),
            attachment: message.attachment.as_ref().map(WireAttachment::from),
            reply_to: message.reply_to,
            reactions: message.reactions.clone(),
        }
    }
}

impl WireMessage {
    /// Convert a received message into the live model. The attachment keeps
    /// its binary form; a display handle is attached by the receiver.
    pub fn into_message(self) -> Message {
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
                data: AttachmentData::Binary(a.data),
                url: None,
            }),
            reply_to: self.reply_to,
            reactions: self.reactions.normalized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayUrl;

    #[test]
    fn test_wire_payload_roundtrip() {
        let mut message = Message::with_attachment(
            PeerId::new("alice"),
            Attachment::from_bytes(
                "cat.png".into(),
                "image/png".into(),
                Bytes::from_static(&[0x89, b'P', b'N', b'G']),
            ),
            Some("look".into()),
            None,
        );
        message.reactions.toggle("😻", &PeerId::new("bob"));

        let payload = WirePayload::Message(WireMessage::from(&message));
        let bytes = payload.to_bytes().unwrap();
        let restored = WirePayload::from_bytes(&bytes).unwrap();

        if let WirePayload::Message(wire) = restored {
            let received = wire.into_message();
            assert_eq!(received, message);
        } else {
            panic!("Message type mismatch");
        }
    }

    #[test]
    fn display_url_is_not_transmitted() {
        let mut attachment =
            Attachment::from_bytes("a.txt".into(), "text/plain".into(), Bytes::from_static(b"hi"));
        attachment.url = Some(DisplayUrl::new("blob:tandem/local"));
        let message = Message::with_attachment(PeerId::new("alice"), attachment, None, None);

        let received = WireMessage::from(&message).into_message();
        assert!(received.attachment.unwrap().url.is_none());
    }

    #[test]
    fn reaction_action_decodes_to_its_variant() {
        let action = ReactionAction {
            message_id: MessageId::new(),
            emoji: "👍".into(),
        };
        let bytes = WirePayload::Reaction(action.clone()).to_bytes().unwrap();
        assert_eq!(
            WirePayload::from_bytes(&bytes).unwrap(),
            WirePayload::Reaction(action)
        );
    }

    #[test]
    fn unknown_payloads_are_rejected() {
        assert!(WirePayload::from_bytes(&[]).is_err());
        assert!(WirePayload::from_bytes(&[9, 0, 0, 0, 1, 2]).is_err());
    }
}
