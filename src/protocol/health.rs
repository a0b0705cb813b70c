use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, error, warn};

use crate::crypto::PeerId;
use crate::host::DynStream;
use crate::message_types::decode_message;
use crate::message_types::header_messages::{LastHeaderRequest, LastHeaderResponse};
use crate::protocol::{
    Protocol, ProtocolContext, ProtocolRegistryBuilder, StreamHandler, HEALTH_PROTOCOL,
    LAST_HEADER_REQ, LAST_HEADER_RESP,
};
use crate::types::BlockHeader;
use crate::{Error, Result};

/// Bound on the whole per-peer header fetch: stream open, send and read.
pub const PEER_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn register(builder: &mut ProtocolRegistryBuilder) {
    builder.register_protocol(HEALTH_PROTOCOL, |context| {
        Arc::new(HealthProtocol::new(context)) as Arc<dyn Protocol>
    });
    builder.register_stream_handler(HEALTH_PROTOCOL, LAST_HEADER_REQ, || {
        Arc::new(HealthHandler::new()) as Arc<dyn StreamHandler>
    });
}

///
/// Estimates how far this node trails the network. Each interval it samples
/// a bounded random subset of connected peers, asks each for its last
/// header over a fresh stream, and records (max observed peer height −
/// local height). Sync decision logic elsewhere in the node reads the
/// metric through `fall_behind()`.
///
pub struct HealthProtocol {
    context: Arc<ProtocolContext>,
    fall_behind: Mutex<i64>,
}

impl HealthProtocol {
    pub fn new(context: Arc<ProtocolContext>) -> HealthProtocol {
        HealthProtocol {
            context,
            fall_behind: Mutex::new(0),
        }
    }

    pub async fn fall_behind(&self) -> i64 {
        *self.fall_behind.lock().await
    }

    ///
    /// One sampling round. Peer failures are logged and skipped; the metric
    /// is only replaced when at least one peer responded and the local
    /// header query succeeded, otherwise the previous value stands.
    ///
    pub async fn update_fall_behind(&self) {
        let peers = sample_peers(
            self.context.host.connected_peers(),
            self.context.config.max_header_query,
        );

        let mut max_height: i64 = -1;
        let mut responders = 0usize;
        for peer in &peers {
            match self.last_header_from_peer(peer).await {
                Ok(header) => {
                    responders += 1;
                    if header.height > max_height {
                        max_height = header.height;
                    }
                }
                Err(err) => {
                    error!("update_fall_behind: query to {} failed: {}", peer, err);
                }
            }
        }
        if responders == 0 {
            return;
        }

        let local = match self.context.bus.fetch_last_header().await {
            Ok(header) => header,
            Err(err) => {
                error!("update_fall_behind: local header query failed: {}", err);
                return;
            }
        };

        let mut fall_behind = self.fall_behind.lock().await;
        *fall_behind = max_height - local.height;
        debug!(
            "update_fall_behind: {} peers sampled, fall behind {}",
            peers.len(),
            *fall_behind
        );
    }

    /// Opens a fresh stream to `peer`, sends an envelope-only request and
    /// reads the tagged-union reply, all within `PEER_FETCH_TIMEOUT`.
    pub async fn last_header_from_peer(&self, peer: &PeerId) -> Result<BlockHeader> {
        timeout(PEER_FETCH_TIMEOUT, self.query_last_header(peer))
            .await
            .map_err(|_| Error::Timeout("last header from peer"))?
    }

    async fn query_last_header(&self, peer: &PeerId) -> Result<BlockHeader> {
        let stream = self.context.host.new_stream(peer, LAST_HEADER_REQ).await?;
        let request = LastHeaderRequest {
            comm: self.context.new_envelope(false),
        };
        self.context
            .stream_manager
            .send_message(&request, &stream)
            .await?;
        let frame = stream.read_frame().await?;
        match decode_message::<LastHeaderResponse>(&frame)? {
            LastHeaderResponse::Header(header) => Ok(header),
            LastHeaderResponse::Error(reason) => Err(Error::PeerResponse(reason)),
        }
    }

    /// Responder side: serve our own last header on the requesting stream.
    pub async fn on_last_header_req(&self, stream: DynStream) {
        let response = match self.context.bus.fetch_last_header().await {
            Ok(header) => {
                debug!(
                    "on_last_header_req: serving height {} hash {}",
                    header.height,
                    hex::encode(header.hash)
                );
                LastHeaderResponse::Header(header)
            }
            Err(err) => LastHeaderResponse::Error(err.to_string()),
        };
        stream.set_protocol(LAST_HEADER_RESP);
        if let Err(err) = self
            .context
            .stream_manager
            .send_message(&response, &stream)
            .await
        {
            warn!(
                "on_last_header_req: reply to {} failed: {}",
                stream.remote_peer(),
                err
            );
        }
    }

    async fn run_fall_behind_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.context.config.health_interval_secs);
        // first firing one full interval after start
        let mut tick = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = tick.tick() => self.update_fall_behind().await,
                _ = shutdown.recv() => break,
            }
        }
    }
}

/// Uniform random subset of at most `cap` peers. Sets within the cap are
/// returned untouched.
pub fn sample_peers(mut peers: Vec<PeerId>, cap: usize) -> Vec<PeerId> {
    if peers.len() > cap {
        peers.shuffle(&mut thread_rng());
        peers.truncate(cap);
    }
    peers
}

#[async_trait]
impl Protocol for HealthProtocol {
    fn id(&self) -> &'static str {
        HEALTH_PROTOCOL
    }

    async fn init_protocol(self: Arc<Self>) {
        let shutdown = self.context.shutdown.subscribe();
        tokio::spawn(async move {
            self.run_fall_behind_loop(shutdown).await;
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Answers inbound last-header requests with the local chain's view.
pub struct HealthHandler {
    protocol: OnceCell<Arc<HealthProtocol>>,
}

impl HealthHandler {
    pub fn new() -> HealthHandler {
        HealthHandler {
            protocol: OnceCell::new(),
        }
    }

    fn protocol(&self) -> &Arc<HealthProtocol> {
        self.protocol
            .get()
            .expect("health handler used before linking")
    }
}

impl Default for HealthHandler {
    fn default() -> HealthHandler {
        HealthHandler::new()
    }
}

#[async_trait]
impl StreamHandler for HealthHandler {
    fn set_protocol(&self, protocol: Arc<dyn Protocol>) {
        let protocol = protocol
            .as_any_arc()
            .downcast::<HealthProtocol>()
            .unwrap_or_else(|_| panic!("health handler linked to a foreign protocol"));
        if self.protocol.set(protocol).is_err() {
            panic!("health handler linked twice");
        }
    }

    async fn handle(&self, payload: Vec<u8>, stream: DynStream) {
        if decode_message::<LastHeaderRequest>(&payload).is_err() {
            return;
        }
        self.protocol().on_last_header_req(stream).await;
    }
}
