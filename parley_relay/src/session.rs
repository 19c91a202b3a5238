// Session state for the chat relay.
//
// `Session` is the central data structure that `server.rs` drives. It owns the
// message history and the connection registry, and applies the per-connection
// protocol: `init` on connect, `new` broadcast on post, `sync` reply on
// request, cleanup on disconnect. All mutation happens through methods called
// from the server's single-threaded event loop, with no internal locking. That
// loop is the one serialization point for id allocation, and because frames
// are queued on per-connection FIFO outboxes in the order the loop produces
// them, every client sees `new` events in id order.
//
// Connection lifecycle as seen from here:
// - CONNECTING: WebSocket handshake on the connection thread; the session
//   does not know the connection yet.
// - OPEN: `connect` registered it. Requests are applied.
// - CLOSED: `disconnect` (or a failed delivery) removed it. Late requests
//   tagged with its id are ignored.
//
// Write failures to a single client never reach the caller: the registry
// drops that connection and the rest of the broadcast proceeds.

use log::{debug, error};
use parley_protocol::codec::encode;
use parley_protocol::message::{Request, ServerMessage};
use parley_protocol::types::{ChatMessage, MessageId};
use tungstenite::Utf8Bytes;

use crate::history::MessageLog;
use crate::registry::{ConnectionId, ConnectionRegistry, Outbox};

#[derive(Default)]
pub struct Session {
    history: MessageLog,
    connections: ConnectionRegistry,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly handshaken connection and send it the full history.
    pub fn connect(&mut self, conn: ConnectionId, outbox: Outbox) {
        self.connections.register(conn, outbox);
        let snapshot = self.history.snapshot().to_vec();
        let last_id = self.history.last_id();
        debug!(
            "{conn} connected ({} open, {} messages in history)",
            self.connections.len(),
            snapshot.len()
        );
        if self.send_to(conn, &ServerMessage::Init { messages: snapshot }) {
            self.connections.set_checkpoint(conn, last_id);
        }
    }

    /// Forget a connection. Safe to call more than once.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if self.connections.unregister(conn) {
            debug!("{conn} disconnected ({} open)", self.connections.len());
        }
    }

    /// Apply one validated request from an open connection.
    pub fn handle_request(&mut self, conn: ConnectionId, request: Request) {
        if !self.connections.contains(conn) {
            debug!("ignoring request from closed {conn}");
            return;
        }
        match request {
            Request::Post { user, text } => {
                self.post(user, text);
            }
            Request::Sync { last_received_id } => self.sync(conn, last_received_id),
        }
    }

    /// Append a message and broadcast it to every open connection, the sender
    /// included. Returns the stored message.
    pub fn post(&mut self, user: String, text: String) -> ChatMessage {
        let message = self.history.append(user, text).clone();
        debug!("{} posted message {}", message.user, message.id);
        let event = ServerMessage::New {
            message: message.clone(),
        };
        if let Some(frame) = encode_frame(&event) {
            self.connections.broadcast(&frame, message.id);
        }
        message
    }

    /// Reply to one connection with every message newer than its checkpoint.
    pub fn sync(&mut self, conn: ConnectionId, last_received_id: MessageId) {
        let messages = self.history.since(last_received_id).to_vec();
        debug!(
            "{conn} sync from {last_received_id}: replaying {}",
            messages.len()
        );
        if self.send_to(conn, &ServerMessage::Sync { messages }) {
            self.connections
                .set_checkpoint(conn, self.history.last_id());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_open(&self, conn: ConnectionId) -> bool {
        self.connections.contains(conn)
    }

    /// Highest message id handed to `conn`, if it is open.
    pub fn checkpoint(&self, conn: ConnectionId) -> Option<MessageId> {
        self.connections.checkpoint(conn)
    }

    pub fn history(&self) -> &MessageLog {
        &self.history
    }

    fn send_to(&mut self, conn: ConnectionId, msg: &ServerMessage) -> bool {
        match encode_frame(msg) {
            Some(frame) => self.connections.send_to(conn, frame).is_ok(),
            None => false,
        }
    }
}

fn encode_frame(msg: &ServerMessage) -> Option<Utf8Bytes> {
    match encode(msg) {
        Ok(json) => Some(Utf8Bytes::from(json)),
        Err(e) => {
            error!("failed to encode {msg:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use parley_protocol::codec::decode_server;

    use super::*;

    /// Open a connection on the session and return the receiving end of its
    /// outbox.
    fn open(session: &mut Session, id: u64) -> Receiver<Utf8Bytes> {
        let (outbox, rx) = Outbox::channel(64);
        session.connect(ConnectionId(id), outbox);
        rx
    }

    /// Pop the next queued event for a connection.
    fn recv(rx: &Receiver<Utf8Bytes>) -> ServerMessage {
        let frame = rx.try_recv().expect("no frame queued");
        decode_server(frame.as_str()).unwrap()
    }

    fn ids(messages: &[ChatMessage]) -> Vec<u64> {
        messages.iter().map(|m| m.id.0).collect()
    }

    fn post(session: &mut Session, conn: u64, user: &str, text: &str) {
        session.handle_request(
            ConnectionId(conn),
            Request::Post {
                user: user.into(),
                text: text.into(),
            },
        );
    }

    #[test]
    fn connect_sends_empty_init() {
        let mut session = Session::new();
        let rx = open(&mut session, 1);
        assert_eq!(recv(&rx), ServerMessage::Init { messages: vec![] });
        assert!(session.is_open(ConnectionId(1)));
        assert_eq!(session.checkpoint(ConnectionId(1)), Some(MessageId::ZERO));
    }

    #[test]
    fn post_broadcasts_new_to_everyone_including_sender() {
        let mut session = Session::new();
        let rx_a = open(&mut session, 1);
        let rx_b = open(&mut session, 2);
        let _ = recv(&rx_a);
        let _ = recv(&rx_b);

        post(&mut session, 1, "alice", "hi");

        for rx in [&rx_a, &rx_b] {
            match recv(rx) {
                ServerMessage::New { message } => {
                    assert_eq!(message.id, MessageId(1));
                    assert_eq!(message.user, "alice");
                    assert_eq!(message.text, "hi");
                }
                other => panic!("expected New, got {other:?}"),
            }
            assert!(rx.try_recv().is_err(), "exactly one broadcast");
        }
        assert_eq!(session.checkpoint(ConnectionId(2)), Some(MessageId(1)));
    }

    #[test]
    fn late_joiner_gets_full_init_then_sync_suffix() {
        let mut session = Session::new();
        let rx_a = open(&mut session, 1);
        for text in ["one", "two", "three"] {
            post(&mut session, 1, "alice", text);
        }
        drop(rx_a);

        let rx_b = open(&mut session, 2);
        match recv(&rx_b) {
            ServerMessage::Init { messages } => assert_eq!(ids(&messages), vec![1, 2, 3]),
            other => panic!("expected Init, got {other:?}"),
        }
        assert_eq!(session.checkpoint(ConnectionId(2)), Some(MessageId(3)));

        session.handle_request(
            ConnectionId(2),
            Request::Sync {
                last_received_id: MessageId(1),
            },
        );
        match recv(&rx_b) {
            ServerMessage::Sync { messages } => assert_eq!(ids(&messages), vec![2, 3]),
            other => panic!("expected Sync, got {other:?}"),
        }
    }

    #[test]
    fn sync_past_newest_is_empty() {
        let mut session = Session::new();
        let rx = open(&mut session, 1);
        for text in ["a", "b", "c"] {
            post(&mut session, 1, "alice", text);
        }
        while rx.try_recv().is_ok() {}

        session.sync(ConnectionId(1), MessageId(999));
        assert_eq!(recv(&rx), ServerMessage::Sync { messages: vec![] });
    }

    #[test]
    fn sync_reply_goes_only_to_requester() {
        let mut session = Session::new();
        let rx_a = open(&mut session, 1);
        let rx_b = open(&mut session, 2);
        let _ = recv(&rx_a);
        let _ = recv(&rx_b);

        session.sync(ConnectionId(1), MessageId::ZERO);
        assert!(matches!(recv(&rx_a), ServerMessage::Sync { .. }));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn disconnected_connection_receives_nothing() {
        let mut session = Session::new();
        let rx_a = open(&mut session, 1);
        let rx_b = open(&mut session, 2);
        let _ = recv(&rx_a);
        let _ = recv(&rx_b);

        session.disconnect(ConnectionId(2));
        session.disconnect(ConnectionId(2));
        post(&mut session, 1, "alice", "after");

        assert!(matches!(recv(&rx_a), ServerMessage::New { .. }));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(session.connection_count(), 1);
    }

    #[test]
    fn requests_from_closed_connections_are_ignored() {
        let mut session = Session::new();
        post(&mut session, 7, "ghost", "boo");
        assert!(session.history().is_empty());
    }

    #[test]
    fn dead_outbox_does_not_stop_broadcast() {
        let mut session = Session::new();
        let rx_a = open(&mut session, 1);
        let rx_b = open(&mut session, 2);
        let rx_c = open(&mut session, 3);
        let _ = recv(&rx_a);
        let _ = recv(&rx_c);
        drop(rx_b);

        post(&mut session, 1, "alice", "still here");

        assert!(matches!(recv(&rx_a), ServerMessage::New { .. }));
        assert!(matches!(recv(&rx_c), ServerMessage::New { .. }));
        assert!(!session.is_open(ConnectionId(2)));
    }

    #[test]
    fn broadcasts_arrive_in_id_order() {
        let mut session = Session::new();
        let rx = open(&mut session, 1);
        let _ = recv(&rx);
        for i in 0..20 {
            post(&mut session, 1, "alice", &format!("msg {i}"));
        }
        let received: Vec<u64> = rx
            .try_iter()
            .map(|f| match decode_server(f.as_str()).unwrap() {
                ServerMessage::New { message } => message.id.0,
                other => panic!("expected New, got {other:?}"),
            })
            .collect();
        assert_eq!(received, (1..=20).collect::<Vec<_>>());
    }
}
