use serde::{Deserialize, Serialize};

pub type BlockHash = [u8; 32];

///
/// The chain header exchanged between peers and served by the chain subsystem
/// over the internal bus. Heights are signed because the fall-behind metric
/// derived from them may be negative (we can be ahead of every sampled peer).
///
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: i64,
    pub timestamp: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub tx_count: u32,
    pub difficulty: u64,
}
