// JSON text-frame codec.
//
// Every protocol message travels as one WebSocket text frame holding one JSON
// object. This module is the single place that turns frames into typed
// messages and back, so the relay and the client agree on the format without
// either touching `serde_json` for wire work.
//
// `MAX_REQUEST_SIZE` caps inbound client frames. The relay hands it to the
// WebSocket layer, which refuses larger frames before they are buffered.
// Server frames are not capped here: an `init` carries the whole history.

use serde::Serialize;

use crate::message::{ClientMessage, Request, RequestError, ServerMessage};

/// Maximum size of a single client → relay frame (64 KiB).
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Encode any protocol message as a JSON text frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Decode and validate a client frame.
///
/// `Ok(None)` means the frame was a well-formed request of a type the relay
/// does not handle.
pub fn decode_request(frame: &str) -> Result<Option<Request>, RequestError> {
    let msg: ClientMessage = serde_json::from_str(frame)?;
    msg.into_request()
}

/// Decode a relay frame on the client side.
pub fn decode_server(frame: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(frame)
}
