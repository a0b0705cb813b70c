use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::crypto::PeerId;
use crate::host::DynStream;
use crate::message_types::encode_message;
use crate::Result;

///
/// The pool of long-lived streams the peer-info push loop broadcasts over.
/// One pooled stream per remote peer; adding a stream for a peer that
/// already has one replaces it. Enumeration order is insertion order.
///
pub struct StreamManager {
    streams: RwLock<IndexMap<PeerId, DynStream>>,
}

impl StreamManager {
    pub fn new() -> StreamManager {
        StreamManager {
            streams: RwLock::new(IndexMap::new()),
        }
    }

    pub async fn add_stream(&self, stream: DynStream) {
        self.streams
            .write()
            .await
            .insert(stream.remote_peer(), stream);
    }

    pub async fn remove_stream(&self, peer: &PeerId) {
        self.streams.write().await.shift_remove(peer);
    }

    /// Snapshot of the pooled stream handles in insertion order.
    pub async fn fetch_streams(&self) -> Vec<DynStream> {
        self.streams.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }

    /// Encodes `message` and writes it as one frame on `stream`, under
    /// whatever message-type tag the stream currently carries.
    pub async fn send_message<T: Serialize>(&self, message: &T, stream: &DynStream) -> Result<()> {
        let frame = encode_message(message)?;
        stream.send_frame(frame).await
    }
}

impl Default for StreamManager {
    fn default() -> StreamManager {
        StreamManager::new()
    }
}
