//! Conversation core of a tandem client.
//!
//! [`ChatClient`] owns the message log, the display handles, the persistence
//! layer and the connection manager. Drive it directly, or hand it to
//! [`ChatClient::spawn`] and talk to it through a [`ChatHandle`].

pub mod chat;
pub mod config;
pub mod deep_link;
pub mod error;
pub mod handles;
pub mod log;
pub mod persistence;
pub mod reactions;

use tracing_subscriber::{fmt, EnvFilter};

pub use chat::{
    ChatClient, ChatCommand, ChatHandle, ChatNotification, MessageView, OutgoingFile,
    ReplyPreview,
};
pub use config::ClientConfig;
pub use error::ClientError;
pub use handles::DisplayHandles;
pub use log::MessageLog;
pub use persistence::Persistence;

/// Install the fmt subscriber, honouring `RUST_LOG`. Does nothing if a global
/// subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tandem_client=debug,tandem_net=debug,tandem_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
