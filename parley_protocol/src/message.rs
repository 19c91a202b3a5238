// Protocol messages for client-relay communication.
//
// Two enums define the wire vocabulary, both tagged by a `"type"` field:
// - `ClientMessage`: sent by chat clients to the relay (`message`, `sync`).
// - `ServerMessage`: sent by the relay to clients (`init`, `new`, `sync`).
//
// `ClientMessage` is lenient (optional fields, a catch-all for
// unknown types) so that decoding never fails for a well-formed JSON object
// with an unfamiliar shape. `Request` is the validated form the relay acts on;
// `ClientMessage::into_request` is the only way to get one, and is where
// missing text and the anonymous-user default are decided.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChatMessage, MessageId};

/// Display name used when a `message` request carries no (or an empty) user.
pub const ANONYMOUS_USER: &str = "Anonymous";

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Post a new chat message.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Ask for every message newer than `last_received_id`.
    Sync {
        #[serde(rename = "lastReceivedId")]
        last_received_id: MessageId,
    },
    /// Any other `type`. Ignored by the relay.
    #[serde(other)]
    Unknown,
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full history, sent once right after connect.
    Init { messages: Vec<ChatMessage> },
    /// A newly posted message, sent to every open connection.
    New { message: ChatMessage },
    /// Reply to a `sync` request: messages newer than the requested id.
    Sync { messages: Vec<ChatMessage> },
}

/// A validated client request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Post { user: String, text: String },
    Sync { last_received_id: MessageId },
}

/// Why a client frame was dropped.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message request has no text")]
    MissingText,
}

impl ClientMessage {
    /// Validate into a `Request`. Returns `Ok(None)` for unknown request types,
    /// which the relay ignores without comment.
    pub fn into_request(self) -> Result<Option<Request>, RequestError> {
        match self {
            ClientMessage::Message { user, text } => {
                let text = match text {
                    Some(text) if !text.trim().is_empty() => text,
                    _ => return Err(RequestError::MissingText),
                };
                let user = user
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| ANONYMOUS_USER.to_string());
                Ok(Some(Request::Post { user, text }))
            }
            ClientMessage::Sync { last_received_id } => {
                Ok(Some(Request::Sync { last_received_id }))
            }
            ClientMessage::Unknown => Ok(None),
        }
    }
}
