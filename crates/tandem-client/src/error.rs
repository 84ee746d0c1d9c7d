use tandem_net::SubstrateError;
use tandem_shared::ProtocolError;
use tandem_store::StoreError;
use thiserror::Error;

/// Errors returned by [`crate::ChatClient`] and [`crate::ChatHandle`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Text message with nothing but whitespace and no attachment.
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Attachment is {size} bytes, the limit is {max}")]
    AttachmentTooLarge { size: u64, max: u64 },

    /// No identity has been acquired yet.
    #[error("Not registered with the connection substrate")]
    NoIdentity,

    #[error("Invalid link: {0}")]
    InvalidLink(#[from] url::ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The client task has stopped.
    #[error("Chat client is not running")]
    Closed,
}
