// Error types for the relay server and the chat client.
//
// Per-request problems (bad JSON, missing text) never reach these types: they
// are `parley_protocol::RequestError`s, logged and dropped on the connection
// thread. What lands here is startup failure on the server side and
// connection-level failure on the client side.

use std::io;

use thiserror::Error;

use crate::registry::DeliveryError;

/// Failure to start a relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of a `ChatClient` operation.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[from] io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] Box<tungstenite::Error>),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("refusing to send an empty message")]
    EmptyText,
}
