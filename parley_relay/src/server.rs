// WebSocket server and main event loop for the chat relay.
//
// Architecture: thread-per-connection with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts TCP
//   connections, assigns each a `ConnectionId`, and spawns its connection
//   thread.
// - **Connection threads** (one per client): perform the WebSocket handshake,
//   announce themselves with `InternalEvent::Connected` (carrying the
//   connection's `Outbox`), then run `connection::pump`. Inbound frames are
//   decoded and validated here; malformed frames are logged and dropped
//   without touching the session, and only valid requests are forwarded as
//   `InternalEvent::Request`. On exit they send `InternalEvent::Disconnected`.
// - **Event-loop thread**: owns the `Session`, receives events from the
//   channel, and applies them one at a time. This is the single
//   serialization point for id allocation and broadcast order.
//
// The event loop never touches a socket. It only queues frames on outboxes,
// which the connection threads write out, so one slow or dead client cannot
// stall the others.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`. The event loop exits
// within one tick, the listener stops accepting, and every connection thread
// sends a close frame on its next poll. The listener joins the connection
// threads and the event loop joins the listener, so `stop` returns only once
// every socket is closed.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use parley_protocol::codec::{MAX_REQUEST_SIZE, decode_request};
use parley_protocol::message::Request;
use tungstenite::protocol::WebSocketConfig;

use crate::connection::{PumpExit, pump};
use crate::error::RelayError;
use crate::registry::{ConnectionId, Outbox};
use crate::session::Session;

/// How long a new connection may take to finish the WebSocket handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single blocking socket write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the event loop wakes to check for shutdown when idle.
const EVENT_LOOP_TICK: Duration = Duration::from_millis(100);

/// Sleep between non-blocking accept attempts.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Events sent from connection threads to the event loop.
enum InternalEvent {
    Connected {
        conn: ConnectionId,
        outbox: Outbox,
    },
    Request {
        conn: ConnectionId,
        request: Request,
    },
    Disconnected {
        conn: ConnectionId,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Frames a connection may have queued before it is evicted.
    pub outbox_capacity: usize,
    /// Read timeout of each connection thread between outbox drains.
    pub poll_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
            outbox_capacity: 1024,
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Per-connection settings handed to each connection thread.
#[derive(Clone, Copy)]
struct ConnectionSettings {
    outbox_capacity: usize,
    poll_interval: Duration,
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    let listener =
        TcpListener::bind((config.host.as_str(), config.port)).map_err(|source| {
            RelayError::Bind {
                addr: format!("{}:{}", config.host, config.port),
                source,
            }
        })?;
    let addr = listener.local_addr()?;
    // The accept loop polls so it can notice shutdown.
    listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();
    let settings = ConnectionSettings {
        outbox_capacity: config.outbox_capacity,
        poll_interval: config.poll_interval.max(Duration::from_millis(1)),
    };

    let thread = thread::spawn(move || {
        run_relay(listener, settings, keep_running_clone);
    });

    info!("relay listening on ws://{addr}");
    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Event loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, settings: ConnectionSettings, keep_running: Arc<AtomicBool>) {
    let mut session = Session::new();
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    let keep_running_listener = keep_running.clone();
    let listener_thread = thread::spawn(move || {
        accept_loop(listener, settings, tx, keep_running_listener);
    });

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(EVENT_LOOP_TICK) {
            Ok(event) => handle_event(&mut session, event),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = listener_thread.join();
    info!(
        "relay stopped ({} messages, {} connections open at shutdown)",
        session.history().len(),
        session.connection_count()
    );
}

/// Dispatch a single event to the session.
fn handle_event(session: &mut Session, event: InternalEvent) {
    match event {
        InternalEvent::Connected { conn, outbox } => session.connect(conn, outbox),
        InternalEvent::Request { conn, request } => session.handle_request(conn, request),
        InternalEvent::Disconnected { conn } => session.disconnect(conn),
    }
}

/// Accept TCP connections and spawn a connection thread for each.
fn accept_loop(
    listener: TcpListener,
    settings: ConnectionSettings,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let mut next_conn = 0u64;
    let mut connection_threads: Vec<thread::JoinHandle<()>> = Vec::new();
    while keep_running.load(Ordering::SeqCst) {
        connection_threads.retain(|t| !t.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                next_conn += 1;
                let conn = ConnectionId(next_conn);
                debug!("{conn} accepted from {peer}");
                let tx_conn = tx.clone();
                let keep_running_conn = keep_running.clone();
                connection_threads.push(thread::spawn(move || {
                    serve_connection(stream, conn, settings, tx_conn, keep_running_conn);
                }));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(e) => {
                // Typically fd exhaustion; keep serving existing clients.
                warn!("accept failed: {e}");
                thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }

    // Each thread sends its close frame within one poll interval.
    for t in connection_threads {
        let _ = t.join();
    }
}

/// Handshake, register, and run one client connection to completion.
fn serve_connection(
    stream: TcpStream,
    conn: ConnectionId,
    settings: ConnectionSettings,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false).ok();
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();
    stream.set_write_timeout(Some(WRITE_TIMEOUT)).ok();

    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(MAX_REQUEST_SIZE))
        .max_frame_size(Some(MAX_REQUEST_SIZE));
    let mut ws = match tungstenite::accept_with_config(stream, Some(ws_config)) {
        Ok(ws) => ws,
        Err(e) => {
            debug!("{conn} handshake failed: {e}");
            return;
        }
    };
    if let Err(e) = ws.get_ref().set_read_timeout(Some(settings.poll_interval)) {
        warn!("{conn} could not set poll interval: {e}");
        return;
    }

    let (outbox, inbox) = Outbox::channel(settings.outbox_capacity);
    if tx.send(InternalEvent::Connected { conn, outbox }).is_err() {
        return;
    }

    let exit = pump(&mut ws, &inbox, &keep_running, |frame| {
        match decode_request(frame) {
            Ok(Some(request)) => {
                let _ = tx.send(InternalEvent::Request { conn, request });
            }
            Ok(None) => debug!("{conn} sent a request of unknown type; ignoring"),
            Err(e) => warn!("{conn} dropped request: {e}"),
        }
    });
    match exit {
        PumpExit::Failed(e) => debug!("{conn} closed on error: {e}"),
        other => debug!("{conn} closed: {other:?}"),
    }

    let _ = tx.send(InternalEvent::Disconnected { conn });
}
