// Client-side chat history with dedup by message id.
//
// The relay may deliver the same message more than once to one client: the
// `init` snapshot on connect and a `sync` reply can overlap, and a `new`
// broadcast can race a `sync` reply. `Transcript` absorbs all three event
// kinds and keeps exactly one copy of each id, in ascending id order.
//
// `last_id()` is the checkpoint a reconnecting client sends as
// `lastReceivedId`.

use crate::message::ServerMessage;
use crate::types::{ChatMessage, MessageId};

/// Deduplicated, id-ordered chat history as seen by one client.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one relay event. Returns how many messages were new to us.
    pub fn apply(&mut self, event: &ServerMessage) -> usize {
        match event {
            ServerMessage::Init { messages } | ServerMessage::Sync { messages } => {
                self.merge(messages)
            }
            ServerMessage::New { message } => self.merge(std::slice::from_ref(message)),
        }
    }

    /// Merge messages into the history, skipping ids we already hold.
    pub fn merge(&mut self, incoming: &[ChatMessage]) -> usize {
        let mut added = 0;
        for msg in incoming {
            // Fast path: in-order delivery appends at the end.
            if self.messages.last().is_none_or(|last| last.id < msg.id) {
                self.messages.push(msg.clone());
                added += 1;
                continue;
            }
            if let Err(pos) = self.messages.binary_search_by_key(&msg.id, |m| m.id) {
                self.messages.insert(pos, msg.clone());
                added += 1;
            }
        }
        added
    }

    /// Highest id held, or `MessageId::ZERO` when empty.
    pub fn last_id(&self) -> MessageId {
        self.messages.last().map_or(MessageId::ZERO, |m| m.id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
