//! Typed access to the three persisted entries.

use rusqlite::params;
use tandem_shared::constants::{KEY_LAST_PEER, KEY_LOCAL_PEER, KEY_MESSAGES};
use tandem_shared::PeerId;

use crate::database::Database;
use crate::error::Result;
use crate::models::StoredMessage;

impl Database {
    /// Read the message snapshot. A missing or unparsable snapshot reads as
    /// an empty conversation.
    pub fn load_snapshot(&self) -> Result<Vec<StoredMessage>> {
        let Some(raw) = self.get(KEY_MESSAGES)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<StoredMessage>>(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "discarding malformed snapshot");
                Ok(Vec::new())
            }
        }
    }

    pub fn save_snapshot(&self, messages: &[StoredMessage]) -> Result<()> {
        let json = serde_json::to_string(messages)?;
        self.set(KEY_MESSAGES, &json)?;
        tracing::debug!(count = messages.len(), bytes = json.len(), "snapshot written");
        Ok(())
    }

    pub fn local_peer_id(&self) -> Result<Option<PeerId>> {
        Ok(self.get(KEY_LOCAL_PEER)?.filter(|s| !s.is_empty()).map(PeerId::new))
    }

    pub fn set_local_peer_id(&self, id: &PeerId) -> Result<()> {
        self.set(KEY_LOCAL_PEER, id.as_str())
    }

    pub fn clear_local_peer_id(&self) -> Result<bool> {
        self.remove(KEY_LOCAL_PEER)
    }

    pub fn last_peer_id(&self) -> Result<Option<PeerId>> {
        Ok(self.get(KEY_LAST_PEER)?.filter(|s| !s.is_empty()).map(PeerId::new))
    }

    pub fn set_last_peer_id(&self, id: &PeerId) -> Result<()> {
        self.set(KEY_LAST_PEER, id.as_str())
    }

    /// Erase the snapshot, the local identifier and the last peer.
    pub fn clear_conversation(&self) -> Result<()> {
        let removed = self.conn().execute(
            "DELETE FROM kv WHERE key IN (?1, ?2, ?3)",
            params![KEY_MESSAGES, KEY_LOCAL_PEER, KEY_LAST_PEER],
        )?;
        tracing::info!(removed, "conversation storage cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_shared::Message;

    #[test]
    fn snapshot_round_trip_preserves_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = PeerId::new("alice");
        let stored: Vec<StoredMessage> = ["one", "two", "three"]
            .iter()
            .map(|t| StoredMessage::from_live(&Message::text(alice.clone(), t.to_string(), None)))
            .collect();

        db.save_snapshot(&stored).unwrap();
        assert_eq!(db.load_snapshot().unwrap(), stored);
    }

    #[test]
    fn missing_snapshot_is_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_snapshot().unwrap().is_empty());
    }

    #[test]
    fn malformed_snapshot_is_empty() {
        let db = Database::open_in_memory().unwrap();
        db.set(KEY_MESSAGES, "{not json").unwrap();
        assert!(db.load_snapshot().unwrap().is_empty());

        db.set(KEY_MESSAGES, r#"[{"id":"nope"}]"#).unwrap();
        assert!(db.load_snapshot().unwrap().is_empty());
    }

    #[test]
    fn clear_conversation_removes_all_three_keys() {
        let db = Database::open_in_memory().unwrap();
        db.save_snapshot(&[]).unwrap();
        db.set_local_peer_id(&PeerId::new("me")).unwrap();
        db.set_last_peer_id(&PeerId::new("you")).unwrap();
        db.set("unrelated", "kept").unwrap();

        db.clear_conversation().unwrap();

        assert_eq!(db.get(KEY_MESSAGES).unwrap(), None);
        assert_eq!(db.local_peer_id().unwrap(), None);
        assert_eq!(db.last_peer_id().unwrap(), None);
        assert_eq!(db.get("unrelated").unwrap().as_deref(), Some("kept"));
    }
}
