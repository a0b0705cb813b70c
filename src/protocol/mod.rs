pub mod health;
pub mod manager;
pub mod peer_info;
pub mod registry;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::bus::BusClient;
use crate::config::P2pConfig;
use crate::crypto::PeerId;
use crate::host::{DynStream, Host};
use crate::manage::{PeerInfoManager, StreamManager};
use crate::message_types::message_envelope::MessageEnvelope;
use crate::time::create_timestamp;

pub use registry::{ProtocolRegistry, ProtocolRegistryBuilder};

pub const PEER_INFO_PROTOCOL: &str = "peer-info";
pub const HEALTH_PROTOCOL: &str = "health";

// message-type identifiers double as transport stream tags
pub const PEER_INFO_REQ: &str = "/peernet/peerinfo-req/1.0.0";
pub const PEER_INFO_RESP: &str = "/peernet/peerinfo-resp/1.0.0";
pub const LAST_HEADER_REQ: &str = "/peernet/last-header-req/1.0.0";
pub const LAST_HEADER_RESP: &str = "/peernet/last-header-resp/1.0.0";

///
/// A named family of request/response message types and the logic behind
/// them. One instance per identifier per node, created by the protocol
/// manager from the registry's factory and kept alive for the node's
/// lifetime.
///
#[async_trait]
pub trait Protocol: Send + Sync {
    fn id(&self) -> &'static str;

    /// One-shot lifecycle hook: spawn background loops, take bus
    /// subscriptions. Called exactly once, right after construction.
    async fn init_protocol(self: Arc<Self>);

    fn as_any(&self) -> &dyn Any;
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

///
/// Processes frames arriving on streams tagged with one specific
/// message-type identifier, delegating to its owning protocol. Linked to
/// that protocol exactly once by the manager; handlers run concurrently
/// with each other and with the protocols' periodic loops.
///
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Set-once back-reference to the owning protocol instance. Panics on a
    /// second call or if `protocol` is not the expected concrete type.
    fn set_protocol(&self, protocol: Arc<dyn Protocol>);

    /// Transport-level gate checked before `handle`.
    fn verify_request(&self, _payload: &[u8]) -> bool {
        true
    }

    async fn handle(&self, payload: Vec<u8>, stream: DynStream);
}

///
/// Shared runtime context injected into every protocol instance. Read-only
/// after construction apart from the shutdown channel, which the manager
/// fires to stop every background loop.
///
pub struct ProtocolContext {
    pub config: P2pConfig,
    pub bus: BusClient,
    pub host: Arc<dyn Host>,
    pub stream_manager: Arc<StreamManager>,
    pub peer_info_manager: Arc<PeerInfoManager>,
    pub shutdown: broadcast::Sender<()>,
}

impl ProtocolContext {
    pub fn new(
        config: P2pConfig,
        bus: BusClient,
        host: Arc<dyn Host>,
        stream_manager: Arc<StreamManager>,
        peer_info_manager: Arc<PeerInfoManager>,
    ) -> ProtocolContext {
        let (shutdown, _) = broadcast::channel(1);
        ProtocolContext {
            config,
            bus,
            host,
            stream_manager,
            peer_info_manager,
            shutdown,
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }

    /// Builds the common header for an outbound message: local identity,
    /// unix timestamp and a fresh correlation id.
    pub fn new_envelope(&self, gossip: bool) -> MessageEnvelope {
        MessageEnvelope {
            version: self.config.version.clone(),
            node_id: self.host.local_peer_id(),
            node_pubkey: self.host.local_pubkey().to_vec(),
            timestamp: create_timestamp(),
            id: Uuid::new_v4().to_string(),
            gossip,
        }
    }
}

/// The registry every production node consumes: the two concrete protocols
/// and their stream handlers.
pub fn standard_registry() -> ProtocolRegistry {
    let mut builder = ProtocolRegistryBuilder::new();
    peer_info::register(&mut builder);
    health::register(&mut builder);
    builder.freeze()
}
