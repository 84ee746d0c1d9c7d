//! Process-local display handles for attachment bytes.
//!
//! A handle is an opaque `blob:tandem/<uuid>` URL the presentation layer can
//! resolve to the bytes it was issued for. Handles are never written to the
//! wire or to storage and die with the process.

use std::collections::HashMap;

use bytes::Bytes;
use tandem_shared::DisplayUrl;
use uuid::Uuid;

const SCHEME_PREFIX: &str = "blob:tandem/";

#[derive(Debug, Default)]
pub struct DisplayHandles {
    entries: HashMap<DisplayUrl, Bytes>,
}

impl DisplayHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, bytes: Bytes) -> DisplayUrl {
        let url = DisplayUrl::new(format!("{SCHEME_PREFIX}{}", Uuid::new_v4()));
        self.entries.insert(url.clone(), bytes);
        url
    }

    pub fn resolve(&self, url: &DisplayUrl) -> Option<&Bytes> {
        self.entries.get(url)
    }

    pub fn revoke_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
