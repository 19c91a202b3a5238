// Core types for the chat protocol.
//
// `MessageId` is the relay-assigned sequence number that orders the whole
// chat history. `ChatMessage` is the immutable record the relay appends to its
// log and ships to clients inside `init`, `new` and `sync` events.

use serde::{Deserialize, Serialize};

/// Relay-assigned message sequence id. The first message is id 1; id 0 means
/// "nothing received yet" when used as a sync checkpoint.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MessageId(pub u64);

impl MessageId {
    /// The empty checkpoint: every message is newer than this.
    pub const ZERO: MessageId = MessageId(0);

    /// The id that follows this one.
    pub fn next(self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creation time in milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// One chat message as stored by the relay and sent on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user: String,
    pub text: String,
    pub timestamp: Timestamp,
}
