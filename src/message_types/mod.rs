pub mod header_messages;
pub mod message_envelope;
pub mod peer_info_messages;

use serde::{Deserialize, Serialize};

/// Encodes a wire message into one frame's payload bytes.
pub fn encode_message<T: Serialize>(message: &T) -> crate::Result<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

/// Decodes one frame's payload bytes. Handlers treat a decode failure as a
/// malformed inbound message and drop it without responding.
pub fn decode_message<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> crate::Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
