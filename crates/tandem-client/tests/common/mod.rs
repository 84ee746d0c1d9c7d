#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tandem_client::{ChatClient, ChatHandle, ChatNotification, ClientConfig};
use tandem_net::{ConnectionStatus, MemoryBroker};
use tandem_store::Database;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn fast_config() -> ClientConfig {
    ClientConfig {
        persist_debounce: Duration::from_millis(20),
        reconnect_delay: Duration::from_millis(20),
        ..ClientConfig::default()
    }
}

pub fn config_at(path: &Path) -> ClientConfig {
    ClientConfig {
        database_path: Some(path.to_path_buf()),
        ..fast_config()
    }
}

pub fn client_in_memory(broker: &MemoryBroker) -> ChatClient {
    ChatClient::new(
        fast_config(),
        Database::open_in_memory().unwrap(),
        Arc::new(broker.clone()),
    )
}

pub fn client_at(broker: &MemoryBroker, path: &Path) -> ChatClient {
    ChatClient::open(config_at(path), Arc::new(broker.clone())).unwrap()
}

pub struct Spawned {
    pub handle: ChatHandle,
    pub notifications: UnboundedReceiver<ChatNotification>,
}

pub fn spawn(client: ChatClient) -> Spawned {
    let (handle, notifications) = client.spawn();
    Spawned {
        handle,
        notifications,
    }
}

/// Wait until `pick` accepts a notification, skipping the others.
pub async fn wait_for<T>(
    rx: &mut UnboundedReceiver<ChatNotification>,
    mut pick: impl FnMut(ChatNotification) -> Option<T>,
) -> T {
    let search = async {
        while let Some(notification) = rx.recv().await {
            if let Some(found) = pick(notification) {
                return found;
            }
        }
        panic!("notification channel closed");
    };
    tokio::time::timeout(Duration::from_secs(5), search)
        .await
        .expect("timed out waiting for notification")
}

pub async fn wait_for_status(
    rx: &mut UnboundedReceiver<ChatNotification>,
    mut accept: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    wait_for(rx, |n| match n {
        ChatNotification::StatusChanged(status) if accept(&status) => Some(status),
        _ => None,
    })
    .await
}
