//! Ordered, append-only conversation log.

use tandem_shared::{Message, MessageId};

#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Push to the end. Duplicates are kept.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn find_by_id(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    /// Reactions are the only thing that changes after append.
    pub(crate) fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == *id)
    }

    /// The message `message` replies to, if it is still in the log.
    pub fn reply_context(&self, message: &Message) -> Option<&Message> {
        message.reply_to.as_ref().and_then(|id| self.find_by_id(id))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
