// Append-only message history and id sequencer.
//
// `MessageLog` owns the authoritative chat history and the id counter. Ids
// start at 1 and grow by exactly 1 per accepted message; the log is never
// truncated or reordered, so `messages[i].id == i + 1` for the life of the
// process.
//
// There is no internal locking. `append` takes `&mut self`, and the relay keeps
// the log inside the `Session` owned by its single event-loop thread, which is
// what makes "allocate id and store" one indivisible step with respect to all
// connections.

use chrono::Utc;
use parley_protocol::types::{ChatMessage, MessageId, Timestamp};

#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    last_id: MessageId,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id, stamp the current time, store and return the
    /// new message.
    pub fn append(&mut self, user: String, text: String) -> &ChatMessage {
        self.append_at(user, text, Utc::now().timestamp_millis())
    }

    /// `append` with an explicit creation time.
    pub fn append_at(&mut self, user: String, text: String, timestamp: Timestamp) -> &ChatMessage {
        self.last_id = self.last_id.next();
        self.messages.push(ChatMessage {
            id: self.last_id,
            user,
            text,
            timestamp,
        });
        &self.messages[self.messages.len() - 1]
    }

    /// The whole history in id order.
    pub fn snapshot(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Every message with an id strictly greater than `last_id`, in id order.
    /// Empty when `last_id` is at or past the newest message.
    pub fn since(&self, last_id: MessageId) -> &[ChatMessage] {
        let start = self.messages.partition_point(|m| m.id <= last_id);
        &self.messages[start..]
    }

    /// Id of the newest message, or `MessageId::ZERO` when empty.
    pub fn last_id(&self) -> MessageId {
        self.last_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(n: u64) -> MessageLog {
        let mut log = MessageLog::new();
        for i in 1..=n {
            log.append_at(format!("user{i}"), format!("text {i}"), i as i64);
        }
        log
    }

    fn ids(messages: &[ChatMessage]) -> Vec<u64> {
        messages.iter().map(|m| m.id.0).collect()
    }

    #[test]
    fn ids_start_at_one_and_increase_by_one() {
        let mut log = MessageLog::new();
        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.push(log.append("alice".into(), "hi".into()).id.0);
        }
        assert_eq!(seen, (1..=50).collect::<Vec<_>>());
        assert_eq!(log.last_id(), MessageId(50));
        assert_eq!(log.len(), 50);
    }

    #[test]
    fn append_stores_fields_verbatim() {
        let mut log = MessageLog::new();
        let msg = log.append_at("alice".into(), "hi".into(), 1234).clone();
        assert_eq!(
            msg,
            ChatMessage {
                id: MessageId(1),
                user: "alice".into(),
                text: "hi".into(),
                timestamp: 1234,
            }
        );
        assert_eq!(log.snapshot(), &[msg]);
    }

    #[test]
    fn append_stamps_wall_clock_time() {
        let before = Utc::now().timestamp_millis();
        let mut log = MessageLog::new();
        let stamped = log.append("alice".into(), "hi".into()).timestamp;
        let after = Utc::now().timestamp_millis();
        assert!(before <= stamped && stamped <= after);
    }

    #[test]
    fn since_zero_equals_snapshot() {
        let log = log_with(5);
        assert_eq!(log.since(MessageId::ZERO), log.snapshot());

        let empty = MessageLog::new();
        assert!(empty.since(MessageId::ZERO).is_empty());
        assert!(empty.snapshot().is_empty());
    }

    #[test]
    fn since_returns_exact_suffix() {
        let log = log_with(6);
        for k in 0..=6 {
            let expected: Vec<u64> = (k + 1..=6).collect();
            assert_eq!(ids(log.since(MessageId(k))), expected, "since({k})");
        }
    }

    #[test]
    fn since_past_the_end_is_empty() {
        let log = log_with(3);
        assert!(log.since(MessageId(3)).is_empty());
        assert!(log.since(MessageId(999)).is_empty());
        assert!(log.since(MessageId(u64::MAX)).is_empty());
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let log = log_with(20);
        assert!(log.snapshot().windows(2).all(|w| w[0].id < w[1].id));
    }
}
