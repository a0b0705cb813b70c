use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::crypto::PeerId;
use crate::message_types::peer_info_messages::{PeerRecord, PeerSnapshot};

/// Snapshots not refreshed within this window are dropped by the next sweep.
pub const PEER_CACHE_TTL: Duration = Duration::from_secs(60);

///
/// Cache of the last snapshot received from each peer, refreshed by the
/// peer-info protocol and served to the rest of the node through the bus
/// peer-list reply. Entries carry the instant they were stored so stale
/// peers age out instead of lingering after a disconnect.
///
pub struct PeerInfoManager {
    peers: RwLock<HashMap<PeerId, (PeerSnapshot, Instant)>>,
}

impl PeerInfoManager {
    pub fn new() -> PeerInfoManager {
        PeerInfoManager {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn store(&self, peer: PeerId, snapshot: PeerSnapshot) {
        self.peers
            .write()
            .await
            .insert(peer, (snapshot, Instant::now()));
    }

    pub async fn fetch(&self, peer: &PeerId) -> Option<PeerSnapshot> {
        self.peers
            .read()
            .await
            .get(peer)
            .map(|(snapshot, _stored_at)| snapshot.clone())
    }

    /// All cached snapshots as peer-list records, ordered by peer id.
    pub async fn fetch_peers(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().await;
        let mut ordered: Vec<(&PeerId, &PeerSnapshot)> = peers
            .iter()
            .map(|(peer, (snapshot, _stored_at))| (peer, snapshot))
            .collect();
        ordered.sort_by(|(a, _), (b, _)| a.cmp(b));
        ordered
            .into_iter()
            .map(|(_, snapshot)| PeerRecord::from_snapshot(snapshot, false))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Drops every entry not refreshed within `ttl`.
    pub async fn prune(&self, ttl: Duration) {
        self.peers
            .write()
            .await
            .retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
    }
}

impl Default for PeerInfoManager {
    fn default() -> PeerInfoManager {
        PeerInfoManager::new()
    }
}
