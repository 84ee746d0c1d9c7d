//! Attachment codec: binary payloads to storable text and back.
//!
//! Encoding runs only when a snapshot is written, decoding only when one is
//! hydrated. Payloads whose declared size reaches [`PERSIST_THRESHOLD`] are
//! not stored at all; the owning message gets [`EXPIRED_SUFFIX`] instead.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::constants::{EXPIRED_SUFFIX, PERSIST_THRESHOLD};
use crate::error::CodecError;
use crate::models::{Attachment, AttachmentData};

/// Result of preparing an attachment payload for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEncoding {
    /// The payload as base64 text.
    Encoded(String),
    /// The payload is too large to keep and is stored empty.
    Expired,
}

impl StorageEncoding {
    pub fn into_text(self) -> String {
        match self {
            Self::Encoded(text) => text,
            Self::Expired => String::new(),
        }
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Apply the size policy to an attachment's payload. Data that is already
/// encoded passes through untouched; `url` is never read.
pub fn encode_for_storage(attachment: &Attachment) -> StorageEncoding {
    match &attachment.data {
        AttachmentData::Encoded(text) => StorageEncoding::Encoded(text.clone()),
        AttachmentData::Binary(_) if attachment.size >= PERSIST_THRESHOLD => {
            StorageEncoding::Expired
        }
        AttachmentData::Binary(bytes) => StorageEncoding::Encoded(encode_bytes(bytes)),
    }
}

/// Decode a stored payload. Empty input means there is nothing to restore and
/// yields `Ok(None)`.
pub fn decode(text: &str) -> Result<Option<Bytes>, CodecError> {
    if text.is_empty() {
        return Ok(None);
    }
    let bytes = STANDARD.decode(text)?;
    Ok(Some(Bytes::from(bytes)))
}

/// Content of a message whose attachment expired. The suffix is added at most
/// once.
pub fn with_expired_suffix(content: Option<&str>) -> String {
    match content.map(str::trim_end) {
        Some(text) if text.ends_with(EXPIRED_SUFFIX) => text.to_string(),
        Some(text) if !text.is_empty() => format!("{text} {EXPIRED_SUFFIX}"),
        _ => EXPIRED_SUFFIX.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayUrl;

    fn attachment(size: u64, bytes: Bytes) -> Attachment {
        Attachment {
            size,
            ..Attachment::from_bytes("a.bin".into(), "application/octet-stream".into(), bytes)
        }
    }

    #[test]
    fn small_payload_round_trips() {
        let payload = Bytes::from((0u8..=255).cycle().take(4096).collect::<Vec<u8>>());
        let att = attachment(payload.len() as u64, payload.clone());

        let StorageEncoding::Encoded(text) = encode_for_storage(&att) else {
            panic!("small payload must be encoded");
        };
        let decoded = decode(&text).unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn threshold_is_exclusive() {
        let below = attachment(PERSIST_THRESHOLD - 1, Bytes::from_static(b"x"));
        let at = attachment(PERSIST_THRESHOLD, Bytes::from_static(b"x"));

        assert!(matches!(encode_for_storage(&below), StorageEncoding::Encoded(_)));
        assert_eq!(encode_for_storage(&at), StorageEncoding::Expired);
    }

    #[test]
    fn encoded_data_passes_through() {
        let mut att = attachment(10, Bytes::new());
        att.data = AttachmentData::Encoded("aGVsbG8=".into());
        att.url = Some(DisplayUrl::new("blob:tandem/x"));
        assert_eq!(
            encode_for_storage(&att),
            StorageEncoding::Encoded("aGVsbG8=".into())
        );
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode("").unwrap().is_none());
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(decode("not base64 !!").is_err());
    }

    #[test]
    fn suffix_is_appended_once() {
        let once = with_expired_suffix(Some("holiday video"));
        assert_eq!(once, format!("holiday video {EXPIRED_SUFFIX}"));
        assert_eq!(with_expired_suffix(Some(&once)), once);
        assert_eq!(with_expired_suffix(None), EXPIRED_SUFFIX);
        assert_eq!(with_expired_suffix(Some("")), EXPIRED_SUFFIX);
    }
}
