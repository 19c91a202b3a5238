// Test-only chat client for multi-client integration tests.
//
// Wraps the real `ChatClient` (from `parley_relay::client`) and a real
// `Transcript` (from `parley_protocol`) to provide a synchronous,
// test-friendly API for exercising the full pipeline:
// connect → init → post → broadcast → disconnect → reconnect → sync.
//
// The only test-specific code here is the synchronous polling wrappers
// (blocking loops around `ChatClient::next_event()`). Networking and history
// merging use the same code paths a real client would.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parley_protocol::message::ServerMessage;
use parley_protocol::transcript::Transcript;
use parley_protocol::types::{ChatMessage, MessageId};
use parley_relay::client::ChatClient;

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `settle` waits for stray events.
const SETTLE_TIME: Duration = Duration::from_millis(100);

/// A test chat client wrapping a real ChatClient and Transcript.
pub struct TestChatClient {
    addr: SocketAddr,
    client: ChatClient,
    pub transcript: Transcript,
    /// Every event received, in arrival order, including duplicates.
    pub events: Vec<ServerMessage>,
}

impl TestChatClient {
    /// Connect to a relay and wait for the `init` snapshot.
    pub fn connect(addr: SocketAddr, user: &str) -> Self {
        let client = ChatClient::connect(&addr.to_string(), user)
            .expect("TestChatClient::connect failed");
        let mut this = Self {
            addr,
            client,
            transcript: Transcript::new(),
            events: Vec::new(),
        };
        this.poll_until(|msg| matches!(msg, ServerMessage::Init { .. }), "init");
        this
    }

    pub fn user(&self) -> &str {
        self.client.user()
    }

    /// Post a message.
    pub fn say(&mut self, text: &str) {
        self.client.send_message(text).expect("send_message failed");
    }

    /// Send a raw text frame.
    pub fn send_raw(&mut self, frame: &str) {
        self.client.send_raw(frame).expect("send_raw failed");
    }

    /// Send a `sync` request for everything after `last_received_id` and
    /// block until the reply arrives. Returns the replayed messages.
    pub fn sync_from(&mut self, last_received_id: MessageId) -> Vec<ChatMessage> {
        self.client
            .request_sync(last_received_id)
            .expect("request_sync failed");
        match self.poll_until(|msg| matches!(msg, ServerMessage::Sync { .. }), "sync") {
            ServerMessage::Sync { messages } => messages,
            _ => unreachable!(),
        }
    }

    /// Block until a `new` event for `id` has been received.
    pub fn wait_for_id(&mut self, id: MessageId) -> ChatMessage {
        match self.poll_until(
            |msg| matches!(msg, ServerMessage::New { message } if message.id == id),
            "new",
        ) {
            ServerMessage::New { message } => message,
            _ => unreachable!(),
        }
    }

    /// Block until the transcript holds at least `count` messages.
    pub fn wait_for_len(&mut self, count: usize) {
        let start = Instant::now();
        while self.transcript.len() < count {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "{}: timed out with {} of {count} messages",
                self.user(),
                self.transcript.len()
            );
            if let Some(msg) = self.client.next_event(Duration::from_millis(50)) {
                self.record(msg);
            }
        }
    }

    /// Drain whatever arrives within a short window and return it.
    pub fn settle(&mut self) -> Vec<ServerMessage> {
        let deadline = Instant::now() + SETTLE_TIME;
        let mut received = Vec::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.client.next_event(remaining) {
                Some(msg) => {
                    self.record(msg.clone());
                    received.push(msg);
                }
                None => break,
            }
        }
        received
    }

    /// Drop the connection and resume from the transcript's checkpoint via
    /// `ChatClient::connect_from`. Returns the messages replayed by the
    /// `sync` reply.
    pub fn reconnect(&mut self) -> Vec<ChatMessage> {
        self.client.disconnect();
        let checkpoint = self.transcript.last_id();
        let user = self.client.user().to_string();
        self.client = ChatClient::connect_from(&self.addr.to_string(), &user, checkpoint)
            .expect("TestChatClient::reconnect failed");
        self.poll_until(|msg| matches!(msg, ServerMessage::Init { .. }), "init");
        match self.poll_until(|msg| matches!(msg, ServerMessage::Sync { .. }), "sync") {
            ServerMessage::Sync { messages } => messages,
            _ => unreachable!(),
        }
    }

    /// Close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    /// Ids of every `new` event received, in arrival order.
    pub fn new_event_ids(&self) -> Vec<MessageId> {
        self.events
            .iter()
            .filter_map(|msg| match msg {
                ServerMessage::New { message } => Some(message.id),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, msg: ServerMessage) {
        self.transcript.apply(&msg);
        self.events.push(msg);
    }

    fn poll_until<P>(&mut self, mut pred: P, what: &str) -> ServerMessage
    where
        P: FnMut(&ServerMessage) -> bool,
    {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "{}: timed out waiting for {what}",
                self.user()
            );
            if let Some(msg) = self.client.next_event(Duration::from_millis(50)) {
                let hit = pred(&msg);
                self.record(msg.clone());
                if hit {
                    return msg;
                }
            }
        }
    }
}
