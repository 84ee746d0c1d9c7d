//! Types shared by every tandem crate: identifiers, the message model, the
//! wire protocol and the attachment codec.

pub mod codec;
pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{CodecError, ProtocolError};
pub use models::{Attachment, AttachmentData, DisplayUrl, Message, MessageKind, Reactions};
pub use protocol::{ReactionAction, WireAttachment, WireMessage, WirePayload};
pub use types::{AttachmentId, MessageId, PeerId};
