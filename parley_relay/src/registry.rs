// Connection registry: the set of open connections and their outboxes.
//
// Each open connection has an `Outbox`, a bounded queue of encoded text
// frames. The connection's own I/O thread drains it onto the socket (see
// `connection.rs`), so handing a frame to an outbox never blocks the session.
//
// Delivery failure removes the connection. `Closed` means its I/O thread is
// gone; `Full` means the client stopped reading. In both cases dropping the
// entry drops the last `Outbox` sender, which tells the I/O thread to close
// the socket. A client that reconnects resyncs from its own checkpoint, so
// eviction never leaves it with a silent gap or out-of-order ids.
//
// The per-connection checkpoint records the highest message id handed to that
// connection. It is bookkeeping only; broadcasts go to every open connection
// regardless of it.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use log::warn;
use parley_protocol::types::MessageId;
use thiserror::Error;
use tungstenite::Utf8Bytes;

/// Relay-assigned connection handle. Never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbox full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Sending half of a connection's bounded frame queue.
#[derive(Clone, Debug)]
pub struct Outbox {
    sender: SyncSender<Utf8Bytes>,
}

impl Outbox {
    /// Create an outbox holding at most `capacity` undelivered frames, and
    /// the receiver its I/O thread drains.
    pub fn channel(capacity: usize) -> (Outbox, Receiver<Utf8Bytes>) {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        (Outbox { sender }, receiver)
    }

    /// Queue a frame without blocking.
    pub fn deliver(&self, frame: Utf8Bytes) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }
}

struct Entry {
    checkpoint: MessageId,
    outbox: Outbox,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with checkpoint 0. Re-registering an id replaces its
    /// outbox.
    pub fn register(&mut self, conn: ConnectionId, outbox: Outbox) {
        self.connections.insert(
            conn,
            Entry {
                checkpoint: MessageId::ZERO,
                outbox,
            },
        );
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn unregister(&mut self, conn: ConnectionId) -> bool {
        self.connections.remove(&conn).is_some()
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn checkpoint(&self, conn: ConnectionId) -> Option<MessageId> {
        self.connections.get(&conn).map(|e| e.checkpoint)
    }

    /// Raise a connection's checkpoint. Never moves it backwards.
    pub fn set_checkpoint(&mut self, conn: ConnectionId, id: MessageId) {
        if let Some(entry) = self.connections.get_mut(&conn) {
            entry.checkpoint = entry.checkpoint.max(id);
        }
    }

    /// Apply `f` to every open connection in id order. Connections for which
    /// `f` fails are removed and skipped. Returns how many succeeded.
    pub fn for_each_open<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(ConnectionId, &Outbox) -> Result<(), DeliveryError>,
    {
        let mut delivered = 0;
        self.connections.retain(|conn, entry| match f(*conn, &entry.outbox) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                warn!("dropping {conn}: {e}");
                false
            }
        });
        delivered
    }

    /// Queue a frame for one connection, removing it if delivery fails.
    pub fn send_to(&mut self, conn: ConnectionId, frame: Utf8Bytes) -> Result<(), DeliveryError> {
        let Some(entry) = self.connections.get(&conn) else {
            return Err(DeliveryError::Closed);
        };
        let result = entry.outbox.deliver(frame);
        if let Err(e) = &result {
            warn!("dropping {conn}: {e}");
            self.connections.remove(&conn);
        }
        result
    }

    /// Queue the same frame for every open connection and advance each
    /// recipient's checkpoint to `id`.
    pub fn broadcast(&mut self, frame: &Utf8Bytes, id: MessageId) -> usize {
        let delivered = self.for_each_open(|_, outbox| outbox.deliver(frame.clone()));
        for entry in self.connections.values_mut() {
            entry.checkpoint = entry.checkpoint.max(id);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(s: &str) -> Utf8Bytes {
        Utf8Bytes::from(s.to_string())
    }

    #[test]
    fn register_starts_at_checkpoint_zero() {
        let mut registry = ConnectionRegistry::new();
        let (outbox, _rx) = Outbox::channel(4);
        registry.register(ConnectionId(1), outbox);
        assert!(registry.contains(ConnectionId(1)));
        assert_eq!(registry.checkpoint(ConnectionId(1)), Some(MessageId::ZERO));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (outbox, _rx) = Outbox::channel(4);
        registry.register(ConnectionId(1), outbox);
        assert!(registry.unregister(ConnectionId(1)));
        assert!(!registry.unregister(ConnectionId(1)));
        assert!(!registry.unregister(ConnectionId(42)));
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_reaches_every_open_connection() {
        let mut registry = ConnectionRegistry::new();
        let (a, rx_a) = Outbox::channel(4);
        let (b, rx_b) = Outbox::channel(4);
        registry.register(ConnectionId(1), a);
        registry.register(ConnectionId(2), b);

        assert_eq!(registry.broadcast(&frame("hello"), MessageId(1)), 2);
        assert_eq!(rx_a.try_recv().unwrap().as_str(), "hello");
        assert_eq!(rx_b.try_recv().unwrap().as_str(), "hello");
        assert_eq!(registry.checkpoint(ConnectionId(2)), Some(MessageId(1)));
    }

    #[test]
    fn closed_connection_is_skipped_and_removed() {
        let mut registry = ConnectionRegistry::new();
        let (a, rx_a) = Outbox::channel(4);
        let (b, rx_b) = Outbox::channel(4);
        registry.register(ConnectionId(1), a);
        registry.register(ConnectionId(2), b);
        drop(rx_a);

        assert_eq!(registry.broadcast(&frame("x"), MessageId(1)), 1);
        assert!(!registry.contains(ConnectionId(1)));
        assert_eq!(rx_b.try_recv().unwrap().as_str(), "x");
    }

    #[test]
    fn full_outbox_evicts_only_that_connection() {
        let mut registry = ConnectionRegistry::new();
        let (slow, _rx_slow) = Outbox::channel(1);
        let (fast, rx_fast) = Outbox::channel(8);
        registry.register(ConnectionId(1), slow);
        registry.register(ConnectionId(2), fast);

        registry.broadcast(&frame("1"), MessageId(1));
        registry.broadcast(&frame("2"), MessageId(2));

        assert!(!registry.contains(ConnectionId(1)));
        assert!(registry.contains(ConnectionId(2)));
        let got: Vec<String> = rx_fast.try_iter().map(|f| f.as_str().to_string()).collect();
        assert_eq!(got, vec!["1", "2"]);
    }

    #[test]
    fn send_to_unknown_connection_is_closed() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(
            registry.send_to(ConnectionId(9), frame("x")),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn checkpoint_never_moves_backwards() {
        let mut registry = ConnectionRegistry::new();
        let (outbox, _rx) = Outbox::channel(4);
        registry.register(ConnectionId(1), outbox);
        registry.set_checkpoint(ConnectionId(1), MessageId(5));
        registry.set_checkpoint(ConnectionId(1), MessageId(2));
        assert_eq!(registry.checkpoint(ConnectionId(1)), Some(MessageId(5)));
    }
}
