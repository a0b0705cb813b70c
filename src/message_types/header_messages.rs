use serde::{Deserialize, Serialize};

use crate::message_types::message_envelope::MessageEnvelope;
use crate::types::BlockHeader;

/// Envelope-only request for a peer's last block header.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LastHeaderRequest {
    pub comm: MessageEnvelope,
}

///
/// Tagged-union reply to a last-header request. A responder that cannot
/// produce a header answers with `Error` carrying the reason; the initiator
/// surfaces that string as `Error::PeerResponse`.
///
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum LastHeaderResponse {
    Header(BlockHeader),
    Error(String),
}
