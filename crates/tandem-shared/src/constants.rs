/// Application name
pub const APP_NAME: &str = "Tandem";

/// Largest attachment accepted at the send boundary (30 MiB)
pub const MAX_ATTACHMENT_SIZE: u64 = 30 * 1024 * 1024;

/// Attachments at or above this size are not written to the snapshot (2 MiB)
pub const PERSIST_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Appended to a message's content when its attachment is dropped from storage
pub const EXPIRED_SUFFIX: &str = "(File expired or too large to save)";

/// Reactor recorded for remote toggles when the peer identifier is unknown
pub const UNKNOWN_PEER: &str = "peer";

/// Debounce applied to snapshot writes, in milliseconds
pub const PERSIST_DEBOUNCE_MS: u64 = 1_000;

/// Delay before the single reconnect attempt to the last known peer, in milliseconds
pub const RECONNECT_DELAY_MS: u64 = 1_000;

/// Ceiling of the doubling delay between identity acquisition retries, in milliseconds
pub const IDENTITY_RETRY_MAX_MS: u64 = 30_000;

/// Query parameter carrying the target peer in a share link
pub const DEEP_LINK_PARAM: &str = "peer";

/// Storage keys
pub const KEY_MESSAGES: &str = "chat_messages";
pub const KEY_LOCAL_PEER: &str = "my_peer_id";
pub const KEY_LAST_PEER: &str = "last_peer_id";
