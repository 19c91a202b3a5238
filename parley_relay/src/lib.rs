// parley_relay: WebSocket chat relay.
//
// The relay is a thin message broker: it accepts WebSocket connections from
// chat clients, numbers every posted message with a strictly increasing id,
// broadcasts it to all open connections, and replays the part of the history
// a client missed when that client asks with its last received id. History
// lives in memory for the life of the process.
//
// Module overview:
// - `history.rs`:    `MessageLog`: append-only history and id sequencer.
// - `registry.rs`:   `ConnectionRegistry`: open connections, their bounded
//                    outboxes, and per-connection checkpoints.
// - `session.rs`:    `Session`: the protocol handler (`init`/`new`/`sync`)
//                    tying history and registry together. The core data
//                    structure that `server.rs` drives.
// - `connection.rs`: The single-owner WebSocket read/write loop used by both
//                    server connections and the client.
// - `server.rs`:     TCP listener, connection threads, and the event loop.
//                    Uses `std::net` + `tungstenite` with a thread per
//                    connection and an `mpsc` channel to funnel events into
//                    the single-threaded `Session`.
// - `client.rs`:     `ChatClient`: blocking-free client API for UIs and tests.
// - `error.rs`:      `RelayError` and `ClientError`.
//
// Dependencies: `parley_protocol` (shared message types and codec).
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in
// another process via the library API (`start_relay`).

pub mod client;
pub mod connection;
pub mod error;
pub mod history;
pub mod registry;
pub mod server;
pub mod session;

pub use client::ChatClient;
pub use error::{ClientError, RelayError};
pub use server::{RelayConfig, RelayHandle, start_relay};
