// Single-owner WebSocket I/O loop shared by the server and the client.
//
// A tungstenite `WebSocket` cannot be split into independent read and write
// halves, so each socket is owned by exactly one thread that alternates
// between the two directions:
//
// 1. drain the outbox (frames queued by the session or the client API) onto
//    the socket,
// 2. attempt one read, bounded by the socket's read timeout (the poll
//    interval), and hand any text frame to the caller's callback.
//
// The loop ends when the peer closes, the outbox sender is dropped (the
// session evicted the connection, or the client handle went away), shutdown
// is requested, or a transport error occurs. Binary, ping and pong frames are
// handled by tungstenite or ignored.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};

use tungstenite::{Message, Utf8Bytes, WebSocket};

/// Why a connection loop stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// The peer closed the socket.
    PeerClosed,
    /// Every `Outbox` sender was dropped.
    OutboxClosed,
    /// The shared run flag was cleared.
    Shutdown,
    /// Read or write failed.
    Failed(tungstenite::Error),
}

/// Run the I/O loop until the connection ends. `on_text` receives each inbound
/// text frame in arrival order.
pub fn pump<S, F>(
    ws: &mut WebSocket<S>,
    outbox: &Receiver<Utf8Bytes>,
    keep_running: &AtomicBool,
    mut on_text: F,
) -> PumpExit
where
    S: Read + Write,
    F: FnMut(&str),
{
    loop {
        if !keep_running.load(Ordering::SeqCst) {
            close(ws);
            return PumpExit::Shutdown;
        }

        loop {
            match outbox.try_recv() {
                Ok(frame) => {
                    if let Err(e) = ws.send(Message::Text(frame)) {
                        return PumpExit::Failed(e);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    close(ws);
                    return PumpExit::OutboxClosed;
                }
            }
        }

        match ws.read() {
            Ok(Message::Text(text)) => on_text(text.as_str()),
            Ok(Message::Close(_)) => {
                // tungstenite has queued the close reply; push it out.
                let _ = ws.flush();
                return PumpExit::PeerClosed;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e)) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return PumpExit::PeerClosed;
            }
            Err(e) => return PumpExit::Failed(e),
        }
    }
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn close<S: Read + Write>(ws: &mut WebSocket<S>) {
    let _ = ws.close(None);
    let _ = ws.flush();
}
