use serde::{Deserialize, Serialize};

use crate::crypto::PeerId;

///
/// Common header carried by every request and response payload. The `id`
/// field is a correlation identifier generated fresh for every outbound
/// message; `gossip` is reserved for future relay semantics and is always
/// false for the protocols in this crate.
///
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub version: String,
    pub node_id: PeerId,
    pub node_pubkey: Vec<u8>,
    pub timestamp: u64,
    pub id: String,
    pub gossip: bool,
}
