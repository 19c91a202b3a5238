// WebSocket client for connecting to the chat relay.
//
// Provides a non-blocking interface for a UI or test harness. Architecture:
// - `connect()` performs the TCP connect and WebSocket handshake on the
//   calling thread, then spawns a background I/O thread.
// - The I/O thread owns the socket and runs the same `connection::pump` loop
//   as the relay's connection threads: it writes frames queued on the
//   client's `Outbox` and decodes inbound frames into `ServerMessage`s, which
//   it pushes into an `mpsc` channel.
// - `poll()` drains that inbox without blocking.
//
// The client does not deduplicate. Feed what `poll()` returns into a
// `parley_protocol::Transcript` to get one copy of each message in id order.
// To resume after a dropped connection, open the new one with
// `connect_from(addr, user, transcript.last_id())`: it queues the `sync` for
// everything past that checkpoint right behind the handshake.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use parley_protocol::codec::{decode_server, encode};
use parley_protocol::message::{ClientMessage, ServerMessage};
use parley_protocol::types::MessageId;
use tungstenite::{HandshakeError, Utf8Bytes};

use crate::connection::pump;
use crate::error::ClientError;
use crate::registry::{DeliveryError, Outbox};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const OUTBOX_CAPACITY: usize = 256;

/// WebSocket client for relay communication.
pub struct ChatClient {
    user: String,
    outbox: Option<Outbox>,
    inbox: Receiver<ServerMessage>,
    keep_running: Arc<AtomicBool>,
    io_thread: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connect to a relay at `addr` (`host:port`) and start the I/O thread.
    /// Messages posted through this client carry `user` as their author.
    pub fn connect(addr: &str, user: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let url = format!("ws://{addr}/");
        let (mut ws, _response) = tungstenite::client(url.as_str(), stream).map_err(|e| {
            let source = match e {
                HandshakeError::Failure(e) => e,
                // Blocking streams never leave the handshake half-done.
                HandshakeError::Interrupted(_) => {
                    tungstenite::Error::Io(io::Error::from(io::ErrorKind::TimedOut))
                }
            };
            ClientError::Handshake(Box::new(source))
        })?;
        ws.get_ref().set_read_timeout(Some(POLL_INTERVAL))?;

        let (outbox, outbox_rx) = Outbox::channel(OUTBOX_CAPACITY);
        let (tx, inbox) = mpsc::channel();
        let keep_running = Arc::new(AtomicBool::new(true));
        let running = keep_running.clone();
        let io_thread = thread::spawn(move || {
            let exit = pump(&mut ws, &outbox_rx, &running, |frame| {
                match decode_server(frame) {
                    Ok(msg) => {
                        let _ = tx.send(msg);
                    }
                    Err(e) => warn!("ignoring malformed relay frame: {e}"),
                }
            });
            debug!("relay connection closed: {exit:?}");
        });

        Ok(Self {
            user: user.to_string(),
            outbox: Some(outbox),
            inbox,
            keep_running,
            io_thread: Some(io_thread),
        })
    }

    /// Reconnect after a drop: connect, then ask for every message newer than
    /// `checkpoint` (normally the caller's `Transcript::last_id()`). The relay
    /// answers with `init` followed by the `sync` reply.
    pub fn connect_from(addr: &str, user: &str, checkpoint: MessageId) -> Result<Self, ClientError> {
        let client = Self::connect(addr, user)?;
        client.request_sync(checkpoint)?;
        Ok(client)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Post a chat message. Blank text is refused locally.
    pub fn send_message(&self, text: &str) -> Result<(), ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyText);
        }
        self.send(&ClientMessage::Message {
            user: Some(self.user.clone()),
            text: Some(text.to_string()),
        })
    }

    /// Ask the relay for every message newer than `last_received_id`.
    pub fn request_sync(&self, last_received_id: MessageId) -> Result<(), ClientError> {
        self.send(&ClientMessage::Sync { last_received_id })
    }

    /// Send an arbitrary text frame, bypassing message encoding.
    pub fn send_raw(&self, frame: &str) -> Result<(), ClientError> {
        self.deliver(Utf8Bytes::from(frame.to_string()))
    }

    /// Drain all queued relay events (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next relay event.
    pub fn next_event(&self, timeout: Duration) -> Option<ServerMessage> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// True until the socket has been closed by either side.
    pub fn is_connected(&self) -> bool {
        self.io_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Close the connection and wait for the I/O thread to finish.
    pub fn disconnect(&mut self) {
        // Dropping the outbox makes the I/O thread send a close frame.
        self.outbox = None;
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        let json = encode(msg)?;
        self.deliver(Utf8Bytes::from(json))
    }

    fn deliver(&self, frame: Utf8Bytes) -> Result<(), ClientError> {
        let outbox = self.outbox.as_ref().ok_or(DeliveryError::Closed)?;
        outbox.deliver(frame)?;
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.disconnect();
    }
}
