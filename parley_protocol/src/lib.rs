// parley_protocol: wire protocol for the Parley chat relay.
//
// This crate defines the message types, the JSON text-frame codec, and the
// client-side history merge used by the relay (`parley_relay`) and chat
// clients. It is shared between both sides and has no networking code.
//
// Module overview:
// - `types.rs`:      `MessageId` sequence numbers and the `ChatMessage` record.
// - `message.rs`:    Client-to-relay and relay-to-client message enums, plus
//                    the validated `Request` form the relay acts on.
// - `codec.rs`:      Encode/decode of single JSON text frames.
// - `transcript.rs`: Dedup-by-id history for clients, tolerant of the overlap
//                    between `init`, `sync` and `new` deliveries.
//
// Design decisions:
// - **JSON text frames.** One object per WebSocket text frame, tagged by
//   `"type"`, compatible with the JavaScript clients.
// - **Lenient decode, strict validate.** `ClientMessage` accepts any object
//   with a `type`; `Request` only exists once required fields are checked.

pub mod codec;
pub mod message;
pub mod transcript;
pub mod types;

pub use codec::{MAX_REQUEST_SIZE, decode_request, decode_server, encode};
pub use message::{ANONYMOUS_USER, ClientMessage, Request, RequestError, ServerMessage};
pub use transcript::Transcript;
pub use types::{ChatMessage, MessageId, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    /// The full happy path through the codec as a client would see it:
    /// encode a request, decode on the relay side, build the reply, decode it
    /// back on the client side, and merge into a transcript.
    #[test]
    fn request_reply_through_codec() {
        let frame = encode(&ClientMessage::Sync {
            last_received_id: MessageId(1),
        })
        .unwrap();
        let request = decode_request(&frame).unwrap();
        assert_eq!(
            request,
            Some(Request::Sync {
                last_received_id: MessageId(1),
            })
        );

        let reply = encode(&ServerMessage::Sync {
            messages: vec![ChatMessage {
                id: MessageId(2),
                user: ANONYMOUS_USER.into(),
                text: "late".into(),
                timestamp: 0,
            }],
        })
        .unwrap();
        let mut transcript = Transcript::new();
        transcript.apply(&decode_server(&reply).unwrap());
        assert_eq!(transcript.last_id(), MessageId(2));
    }
}
