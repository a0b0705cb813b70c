use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::{NodePublicKey, PeerId};
use crate::protocol::StreamHandler;
use crate::Result;

pub type DynStream = Arc<dyn PeerStream>;

///
/// One bidirectional, peer-addressed byte channel. A stream carries a single
/// message-type tag at a time; senders retag it before writing so the remote
/// transport can route the frame to the right handler.
///
#[async_trait]
pub trait PeerStream: Send + Sync {
    fn remote_peer(&self) -> PeerId;
    fn protocol(&self) -> String;
    fn set_protocol(&self, message_type: &str);
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()>;
    async fn read_frame(&self) -> Result<Vec<u8>>;
}

///
/// The transport layer, behind a narrow interface. The host owns connection
/// management and wire framing; this crate only opens streams, writes frames
/// and registers the per-message-type handlers the host dispatches inbound
/// frames to.
///
#[async_trait]
pub trait Host: Send + Sync {
    fn local_peer_id(&self) -> PeerId;
    fn local_pubkey(&self) -> NodePublicKey;
    /// Addresses this node advertises to peers. May be empty.
    fn listen_addrs(&self) -> Vec<String>;
    fn connected_peers(&self) -> Vec<PeerId>;
    async fn new_stream(&self, peer: &PeerId, message_type: &str) -> Result<DynStream>;
    fn set_stream_handler(&self, message_type: &str, handler: Arc<dyn StreamHandler>);
}
