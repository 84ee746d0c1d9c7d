//! Reaction reconciliation.
//!
//! A toggle flips one identity's membership in one emoji's reactor set.
//! Both sides apply every toggle they see, so the two logs converge as long
//! as each toggle is delivered once. Redelivery flips again.

use tandem_shared::{MessageId, PeerId, Reactions};
use tracing::debug;

use crate::log::MessageLog;

/// Outcome of a toggle that found its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggled {
    pub message_id: MessageId,
    /// `true` when the reaction was added.
    pub added: bool,
    pub reactions: Reactions,
}

/// Flip `actor`'s `emoji` reaction on `message_id`. A message that is not in
/// the log is ignored.
pub fn toggle_reaction(
    log: &mut MessageLog,
    message_id: &MessageId,
    emoji: &str,
    actor: &PeerId,
) -> Option<Toggled> {
    let Some(message) = log.find_mut(message_id) else {
        debug!(message = %message_id, "reaction for unknown message ignored");
        return None;
    };

    let added = message.reactions.toggle(emoji, actor);
    debug!(message = %message_id, emoji, actor = %actor.short(), added, "reaction toggled");

    Some(Toggled {
        message_id: *message_id,
        added,
        reactions: message.reactions.clone(),
    })
}

/// Identity under which a toggle received from the session is recorded.
pub fn remote_actor(remote_peer: Option<&PeerId>) -> PeerId {
    remote_peer.cloned().unwrap_or_else(PeerId::unknown)
}
