use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Wire serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Empty payload")]
    Empty,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}
