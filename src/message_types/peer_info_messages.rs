use serde::{Deserialize, Serialize};

use crate::message_types::message_envelope::MessageEnvelope;
use crate::types::BlockHeader;

///
/// A node's view of its own state, pushed to peers in answer to a peer-info
/// request. The header is optional: a node that has never managed to fetch
/// one from its chain subsystem still answers.
///
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub name: String,
    pub header: Option<BlockHeader>,
    pub mempool_size: i32,
    pub addr: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PeerInfoRequest {
    pub comm: MessageEnvelope,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PeerInfoResponse {
    pub comm: MessageEnvelope,
    pub peer: PeerSnapshot,
}

/// One entry of the peer-list reply published on the internal bus.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub header: Option<BlockHeader>,
    pub mempool_size: i32,
    pub self_flag: bool,
    pub addr: String,
}

impl PeerRecord {
    pub fn from_snapshot(snapshot: &PeerSnapshot, self_flag: bool) -> PeerRecord {
        PeerRecord {
            name: snapshot.name.clone(),
            header: snapshot.header.clone(),
            mempool_size: snapshot.mempool_size,
            self_flag,
            addr: snapshot.addr.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PeerList {
    pub peers: Vec<PeerRecord>,
}
