use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::bus::NetworkEvent;
use crate::host::DynStream;
use crate::manage::peers::PEER_CACHE_TTL;
use crate::message_types::decode_message;
use crate::message_types::message_envelope::MessageEnvelope;
use crate::message_types::peer_info_messages::{
    PeerInfoRequest, PeerInfoResponse, PeerList, PeerRecord, PeerSnapshot,
};
use crate::protocol::{
    Protocol, ProtocolContext, ProtocolRegistryBuilder, StreamHandler, PEER_INFO_PROTOCOL,
    PEER_INFO_REQ, PEER_INFO_RESP,
};
use crate::types::BlockHeader;

/// In-flight requests older than this are swept on the next push pass.
pub const REQUEST_TTL: Duration = Duration::from_secs(60);

pub fn register(builder: &mut ProtocolRegistryBuilder) {
    builder.register_protocol(PEER_INFO_PROTOCOL, |context| {
        Arc::new(PeerInfoProtocol::new(context)) as Arc<dyn Protocol>
    });
    builder.register_stream_handler(PEER_INFO_PROTOCOL, PEER_INFO_REQ, || {
        Arc::new(PeerInfoHandler::new()) as Arc<dyn StreamHandler>
    });
    builder.register_stream_handler(PEER_INFO_PROTOCOL, PEER_INFO_RESP, || {
        Arc::new(PeerInfoHandler::new()) as Arc<dyn StreamHandler>
    });
}

/// A sent request retained until its response arrives or its TTL expires.
pub struct PendingRequest {
    pub request: PeerInfoRequest,
    pub sent_at: Instant,
}

///
/// Periodically pushes a snapshot request to every pooled stream and caches
/// peers' replies; answers inbound requests with the local node's own
/// snapshot; bridges the internal-bus peer-list event to a reply built from
/// the cache plus a synthetic self entry.
///
pub struct PeerInfoProtocol {
    context: Arc<ProtocolContext>,
    /// Correlation id -> sent request. Responses are accepted whether or not
    /// they match an entry here; the table exists so response handling can
    /// recover request context when one does.
    requests: Mutex<HashMap<String, PendingRequest>>,
    /// Most recent header successfully fetched from the chain subsystem,
    /// reused when the next fetch fails.
    last_header: Mutex<Option<BlockHeader>>,
}

impl PeerInfoProtocol {
    pub fn new(context: Arc<ProtocolContext>) -> PeerInfoProtocol {
        PeerInfoProtocol {
            context,
            requests: Mutex::new(HashMap::new()),
            last_header: Mutex::new(None),
        }
    }

    ///
    /// One push pass: sweep expired bookkeeping, then send a snapshot
    /// request on every pooled stream in insertion order. A send failure
    /// aborts the remaining streams for this pass; the next tick retries
    /// the whole pool.
    ///
    pub async fn peer_info(&self) {
        self.sweep_expired_requests().await;
        self.context.peer_info_manager.prune(PEER_CACHE_TTL).await;

        for stream in self.context.stream_manager.fetch_streams().await {
            let request = PeerInfoRequest {
                comm: self.context.new_envelope(false),
            };
            stream.set_protocol(PEER_INFO_REQ);
            if let Err(err) = self
                .context
                .stream_manager
                .send_message(&request, &stream)
                .await
            {
                warn!(
                    "peer_info: send to {} failed, aborting pass: {}",
                    stream.remote_peer(),
                    err
                );
                return;
            }
            debug!("peer_info: requested snapshot from {}", stream.remote_peer());
            let correlation_id = request.comm.id.clone();
            self.requests.lock().await.insert(
                correlation_id,
                PendingRequest {
                    request,
                    sent_at: Instant::now(),
                },
            );
        }
    }

    async fn sweep_expired_requests(&self) {
        self.requests
            .lock()
            .await
            .retain(|_, pending| pending.sent_at.elapsed() < REQUEST_TTL);
    }

    pub async fn pending_request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    ///
    /// Assembles the local node's snapshot. Each upstream query tolerates
    /// failure on its own: a failed mempool query yields size zero, a failed
    /// header query falls back to the last header we did fetch (possibly
    /// none). The snapshot is produced regardless.
    ///
    pub async fn local_peer_info(&self) -> PeerSnapshot {
        let mempool_size = match self.context.bus.fetch_mempool_size().await {
            Ok(size) => size,
            Err(err) => {
                error!("local_peer_info: mempool size query failed: {}", err);
                0
            }
        };

        let header = match self.context.bus.fetch_last_header().await {
            Ok(header) => {
                *self.last_header.lock().await = Some(header.clone());
                Some(header)
            }
            Err(err) => {
                error!("local_peer_info: last header query failed: {}", err);
                self.last_header.lock().await.clone()
            }
        };

        let addr = self
            .context
            .host
            .listen_addrs()
            .into_iter()
            .next()
            .unwrap_or_default();

        PeerSnapshot {
            name: self.context.local_peer_id().to_string(),
            header,
            mempool_size,
            addr,
        }
    }

    /// Inbound request: answer with our own snapshot on the same stream,
    /// retagged for the response handler on the other side.
    pub async fn on_req(&self, stream: DynStream) {
        let peer = self.local_peer_info().await;
        let response = PeerInfoResponse {
            comm: self.context.new_envelope(false),
            peer,
        };
        stream.set_protocol(PEER_INFO_RESP);
        match self
            .context
            .stream_manager
            .send_message(&response, &stream)
            .await
        {
            Ok(()) => info!("on_req: answered peer info for {}", stream.remote_peer()),
            Err(err) => warn!(
                "on_req: reply to {} failed: {}",
                stream.remote_peer(),
                err
            ),
        }
    }

    /// Inbound response: cache the snapshot under the sending peer. The
    /// matching in-flight entry is dropped when present, but an unknown
    /// correlation id does not reject the response.
    pub async fn on_resp(&self, comm: MessageEnvelope, peer: PeerSnapshot, stream: DynStream) {
        self.requests.lock().await.remove(&comm.id);
        let remote = stream.remote_peer();
        debug!("on_resp: snapshot received from {}", remote);
        self.context.peer_info_manager.store(remote, peer).await;
    }

    async fn handle_peer_list(&self, reply: oneshot::Sender<PeerList>) {
        let mut peers = self.context.peer_info_manager.fetch_peers().await;
        let local = self.local_peer_info().await;
        peers.push(PeerRecord::from_snapshot(&local, true));
        let _ = reply.send(PeerList { peers });
    }

    async fn run_event_loop(
        &self,
        mut events: mpsc::Receiver<NetworkEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(NetworkEvent::GetPeerList { reply }) => self.handle_peer_list(reply).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    }

    async fn run_push_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.context.config.peer_info_interval_secs);
        // first tick fires immediately
        let mut tick = interval(period);
        loop {
            tokio::select! {
                _ = tick.tick() => self.peer_info().await,
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[async_trait]
impl Protocol for PeerInfoProtocol {
    fn id(&self) -> &'static str {
        PEER_INFO_PROTOCOL
    }

    async fn init_protocol(self: Arc<Self>) {
        let events = self.context.bus.take_network_events();
        let shutdown = self.context.shutdown.subscribe();
        let protocol = self.clone();
        tokio::spawn(async move {
            protocol.run_event_loop(events, shutdown).await;
        });

        let shutdown = self.context.shutdown.subscribe();
        tokio::spawn(async move {
            self.run_push_loop(shutdown).await;
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

///
/// Handles both peer-info message types: the stream's tag at dispatch time
/// decides whether the frame is a request or a response. Malformed payloads
/// are dropped without a reply.
///
pub struct PeerInfoHandler {
    protocol: OnceCell<Arc<PeerInfoProtocol>>,
}

impl PeerInfoHandler {
    pub fn new() -> PeerInfoHandler {
        PeerInfoHandler {
            protocol: OnceCell::new(),
        }
    }

    fn protocol(&self) -> &Arc<PeerInfoProtocol> {
        self.protocol
            .get()
            .expect("peer info handler used before linking")
    }
}

impl Default for PeerInfoHandler {
    fn default() -> PeerInfoHandler {
        PeerInfoHandler::new()
    }
}

#[async_trait]
impl StreamHandler for PeerInfoHandler {
    fn set_protocol(&self, protocol: Arc<dyn Protocol>) {
        let protocol = protocol
            .as_any_arc()
            .downcast::<PeerInfoProtocol>()
            .unwrap_or_else(|_| panic!("peer info handler linked to a foreign protocol"));
        if self.protocol.set(protocol).is_err() {
            panic!("peer info handler linked twice");
        }
    }

    async fn handle(&self, payload: Vec<u8>, stream: DynStream) {
        let protocol = self.protocol();
        if stream.protocol() == PEER_INFO_REQ {
            if decode_message::<PeerInfoRequest>(&payload).is_ok() {
                protocol.on_req(stream).await;
            }
            return;
        }
        if let Ok(response) = decode_message::<PeerInfoResponse>(&payload) {
            protocol.on_resp(response.comm, response.peer, stream).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::P2pConfig;
    use crate::host::Host;
    use crate::message_types::encode_message;
    use crate::protocol::manager::ProtocolManager;
    use crate::protocol::standard_registry;
    use crate::test_utilities::mocks::{
        make_mock_header, node_context, start_test_node, wait_until, MockNet, MockStream,
    };
    use crate::time::create_timestamp;

    fn envelope_with_id(id: &str) -> MessageEnvelope {
        MessageEnvelope {
            version: String::from("1.0.0"),
            node_id: crate::crypto::PeerId::random(),
            node_pubkey: vec![2; 33],
            timestamp: create_timestamp(),
            id: id.to_string(),
            gossip: false,
        }
    }

    #[tokio::test]
    async fn test_on_req_answers_with_own_snapshot_under_any_correlation() {
        let net = MockNet::new();
        let responder =
            start_test_node(&net, P2pConfig::default(), Some(make_mock_header(42)), Some(7)).await;
        let asker = net.add_node();

        let stream = asker
            .host
            .new_stream(&responder.node.host.local_peer_id(), PEER_INFO_REQ)
            .await
            .unwrap();
        let request = PeerInfoRequest {
            comm: envelope_with_id("correlation-the-responder-never-saw"),
        };
        stream
            .send_frame(encode_message(&request).unwrap())
            .await
            .unwrap();

        let frame = stream.read_frame().await.unwrap();
        let response: PeerInfoResponse =
            crate::message_types::decode_message(&frame).unwrap();
        assert_eq!(response.peer.header.unwrap().height, 42);
        assert_eq!(response.peer.mempool_size, 7);
        // responders stamp a fresh envelope; nothing about the request's
        // correlation id leaks into the reply
        assert_ne!(response.comm.id, request.comm.id);
    }

    #[tokio::test]
    async fn test_on_resp_accepts_unknown_correlation_ids() {
        let net = MockNet::new();
        let node = net.add_node();
        let (context, _events) =
            node_context(&node, P2pConfig::default(), Some(make_mock_header(1)), Some(0));
        let protocol = PeerInfoProtocol::new(context);

        let remote = crate::crypto::PeerId::random();
        let (stream, _other_end) = MockStream::pair(remote.clone(), node.host.local_peer_id());
        let snapshot = PeerSnapshot {
            name: remote.to_string(),
            header: Some(make_mock_header(9)),
            mempool_size: 3,
            addr: String::from("/mock/remote"),
        };
        protocol
            .on_resp(envelope_with_id("never-sent"), snapshot.clone(), stream)
            .await;

        assert_eq!(node.peer_info_manager.fetch(&remote).await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_peer_info_records_one_request_per_stream() {
        let net = MockNet::new();
        let b = start_test_node(&net, P2pConfig::default(), Some(make_mock_header(5)), Some(0)).await;
        let c = start_test_node(&net, P2pConfig::default(), Some(make_mock_header(6)), Some(0)).await;
        let a = net.add_node();
        let (context, _events) =
            node_context(&a, P2pConfig::default(), Some(make_mock_header(4)), Some(0));
        let protocol = PeerInfoProtocol::new(context);

        net.connect(&a.host.local_peer_id(), &b.node.host.local_peer_id())
            .await;
        net.connect(&a.host.local_peer_id(), &c.node.host.local_peer_id())
            .await;

        protocol.peer_info().await;
        assert_eq!(protocol.pending_request_count().await, 2);
    }

    #[tokio::test]
    async fn test_send_failure_aborts_remaining_streams() {
        let net = MockNet::new();
        let b = start_test_node(&net, P2pConfig::default(), Some(make_mock_header(5)), Some(0)).await;
        let c = start_test_node(&net, P2pConfig::default(), Some(make_mock_header(6)), Some(0)).await;
        let a = net.add_node();
        let (context, _events) =
            node_context(&a, P2pConfig::default(), Some(make_mock_header(4)), Some(0));
        let protocol = PeerInfoProtocol::new(context);

        let to_b = net
            .connect(&a.host.local_peer_id(), &b.node.host.local_peer_id())
            .await;
        net.connect(&a.host.local_peer_id(), &c.node.host.local_peer_id())
            .await;

        // first pooled stream fails, so the pass must stop before reaching c
        to_b.break_link();
        protocol.peer_info().await;
        assert_eq!(protocol.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired_requests() {
        let net = MockNet::new();
        let node = net.add_node();
        let (context, _events) =
            node_context(&node, P2pConfig::default(), Some(make_mock_header(1)), Some(0));
        let protocol = PeerInfoProtocol::new(context.clone());

        let expired_at = Instant::now() - (REQUEST_TTL + Duration::from_secs(1));
        protocol.requests.lock().await.insert(
            String::from("expired"),
            PendingRequest {
                request: PeerInfoRequest {
                    comm: context.new_envelope(false),
                },
                sent_at: expired_at,
            },
        );
        protocol.requests.lock().await.insert(
            String::from("fresh"),
            PendingRequest {
                request: PeerInfoRequest {
                    comm: context.new_envelope(false),
                },
                sent_at: Instant::now(),
            },
        );

        protocol.sweep_expired_requests().await;
        let requests = protocol.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert!(requests.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_mempool_failure_still_yields_valid_header() {
        let net = MockNet::new();
        let node = net.add_node();
        // mempool responder scripted to drop every request
        let (context, _events) =
            node_context(&node, P2pConfig::default(), Some(make_mock_header(42)), None);
        let protocol = PeerInfoProtocol::new(context);

        let snapshot = protocol.local_peer_info().await;
        assert_eq!(snapshot.mempool_size, 0);
        assert_eq!(snapshot.header.unwrap().height, 42);
    }

    #[tokio::test]
    async fn test_header_failure_reuses_last_fetched_header() {
        let net = MockNet::new();
        let node = net.add_node();
        // chain responder scripted to drop every request
        let (context, _events) = node_context(&node, P2pConfig::default(), None, Some(3));
        let protocol = PeerInfoProtocol::new(context);

        let snapshot = protocol.local_peer_info().await;
        assert_eq!(snapshot.header, None);

        *protocol.last_header.lock().await = Some(make_mock_header(17));
        let snapshot = protocol.local_peer_info().await;
        assert_eq!(snapshot.header.unwrap().height, 17);
    }

    #[tokio::test]
    async fn test_peer_list_reply_appends_exactly_one_self_record() {
        let net = MockNet::new();
        let node =
            start_test_node(&net, P2pConfig::default(), Some(make_mock_header(10)), Some(2)).await;
        let cached_peer = crate::crypto::PeerId::random();
        node.node
            .peer_info_manager
            .store(
                cached_peer.clone(),
                PeerSnapshot {
                    name: cached_peer.to_string(),
                    header: Some(make_mock_header(8)),
                    mempool_size: 1,
                    addr: String::from("/mock/cached"),
                },
            )
            .await;

        let (reply, reply_receiver) = oneshot::channel();
        node.network_events
            .send(NetworkEvent::GetPeerList { reply })
            .await
            .unwrap();
        let peer_list = reply_receiver.await.unwrap();

        assert_eq!(peer_list.peers.len(), 2);
        let self_records: Vec<&PeerRecord> = peer_list
            .peers
            .iter()
            .filter(|record| record.self_flag)
            .collect();
        assert_eq!(self_records.len(), 1);
        // the synthetic self entry comes last and reflects the local snapshot
        let last = peer_list.peers.last().unwrap();
        assert!(last.self_flag);
        assert_eq!(last.header.as_ref().unwrap().height, 10);
        assert_eq!(last.mempool_size, 2);
    }

    #[tokio::test]
    async fn test_push_loop_populates_caches_between_two_nodes() {
        let net = MockNet::new();
        let config = P2pConfig {
            peer_info_interval_secs: 1,
            ..P2pConfig::default()
        };
        let a = start_test_node(&net, config.clone(), Some(make_mock_header(5)), Some(1)).await;
        let b = start_test_node(&net, config, Some(make_mock_header(9)), Some(4)).await;
        let a_id = a.node.host.local_peer_id();
        let b_id = b.node.host.local_peer_id();

        net.connect(&a_id, &b_id).await;

        assert!(
            wait_until(|| {
                let a_cache = a.node.peer_info_manager.clone();
                let b_cache = b.node.peer_info_manager.clone();
                let (a_id, b_id) = (a_id.clone(), b_id.clone());
                async move {
                    a_cache.fetch(&b_id).await.is_some() && b_cache.fetch(&a_id).await.is_some()
                }
            })
            .await
        );

        let b_snapshot = a.node.peer_info_manager.fetch(&b_id).await.unwrap();
        assert_eq!(b_snapshot.header.unwrap().height, 9);
        assert_eq!(b_snapshot.mempool_size, 4);
    }

    #[tokio::test]
    async fn test_init_produces_one_instance_per_protocol() {
        let net = MockNet::new();
        let node = net.add_node();
        let (context, _events) =
            node_context(&node, P2pConfig::default(), Some(make_mock_header(1)), Some(0));
        let manager = ProtocolManager::init(&standard_registry(), context).await;

        assert_eq!(manager.protocol_count(), 2);
        let protocol = manager.protocol(PEER_INFO_PROTOCOL).unwrap();
        assert!(protocol.as_any().downcast_ref::<PeerInfoProtocol>().is_some());
        assert!(manager.protocol("no-such-protocol").is_none());
    }
}
