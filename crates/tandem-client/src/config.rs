//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so a client starts with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use tandem_shared::constants::{PERSIST_DEBOUNCE_MS, RECONNECT_DELAY_MS};
use url::Url;

const DEFAULT_SHARE_URL: &str = "https://tandem.local/";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite file holding the snapshot and identifiers.
    /// Env: `TANDEM_DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Quiet period before a changed log is written.
    /// Env: `TANDEM_PERSIST_DEBOUNCE_MS`
    /// Default: 1000 ms
    pub persist_debounce: Duration,

    /// Wait between acquiring an identity and redialling the last peer.
    /// Env: `TANDEM_RECONNECT_DELAY_MS`
    /// Default: 1000 ms
    pub reconnect_delay: Duration,

    /// Base of the share link handed to the other participant.
    /// Env: `TANDEM_SHARE_URL`
    /// Default: `https://tandem.local/`
    pub share_base_url: Url,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            persist_debounce: Duration::from_millis(PERSIST_DEBOUNCE_MS),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
            share_base_url: default_share_url(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TANDEM_DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup("TANDEM_PERSIST_DEBOUNCE_MS") {
            match value.parse::<u64>() {
                Ok(ms) => config.persist_debounce = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    value = %value,
                    "Invalid TANDEM_PERSIST_DEBOUNCE_MS, using default"
                ),
            }
        }

        if let Some(value) = lookup("TANDEM_RECONNECT_DELAY_MS") {
            match value.parse::<u64>() {
                Ok(ms) => config.reconnect_delay = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    value = %value,
                    "Invalid TANDEM_RECONNECT_DELAY_MS, using default"
                ),
            }
        }

        if let Some(value) = lookup("TANDEM_SHARE_URL") {
            match Url::parse(&value) {
                Ok(url) if !url.cannot_be_a_base() => config.share_base_url = url,
                _ => tracing::warn!(value = %value, "Invalid TANDEM_SHARE_URL, using default"),
            }
        }

        config
    }
}

fn default_share_url() -> Url {
    Url::parse(DEFAULT_SHARE_URL).expect("valid share url")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = from_pairs(&[]);
        assert!(config.database_path.is_none());
        assert_eq!(config.persist_debounce, Duration::from_secs(1));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.share_base_url.as_str(), "https://tandem.local/");
    }

    #[test]
    fn values_are_read() {
        let config = from_pairs(&[
            ("TANDEM_DATABASE_PATH", "/tmp/chat.db"),
            ("TANDEM_PERSIST_DEBOUNCE_MS", "250"),
            ("TANDEM_RECONNECT_DELAY_MS", "0"),
            ("TANDEM_SHARE_URL", "https://chat.example.org/join"),
        ]);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/chat.db")));
        assert_eq!(config.persist_debounce, Duration::from_millis(250));
        assert_eq!(config.reconnect_delay, Duration::ZERO);
        assert_eq!(config.share_base_url.host_str(), Some("chat.example.org"));
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("TANDEM_PERSIST_DEBOUNCE_MS", "soon"),
            ("TANDEM_RECONNECT_DELAY_MS", "-5"),
            ("TANDEM_SHARE_URL", "not a url"),
        ]);
        assert_eq!(config.persist_debounce, Duration::from_secs(1));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.share_base_url.as_str(), "https://tandem.local/");
    }
}
