use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::sleep;

use crate::bus::{
    node_bus, BusClient, ChainRequest, MempoolRequest, NetworkEvent, SubsystemHandles,
};
use crate::config::P2pConfig;
use crate::crypto::{generate_keys, hash, NodePublicKey, PeerId};
use crate::host::{DynStream, Host, PeerStream};
use crate::manage::{PeerInfoManager, StreamManager};
use crate::protocol::manager::ProtocolManager;
use crate::protocol::{standard_registry, ProtocolContext, StreamHandler};
use crate::time::create_timestamp;
use crate::types::BlockHeader;
use crate::{Error, Result};

pub fn make_mock_header(height: i64) -> BlockHeader {
    BlockHeader {
        height,
        timestamp: create_timestamp(),
        hash: hash(&height.to_le_bytes()),
        parent_hash: [0; 32],
        tx_count: 0,
        difficulty: 1,
    }
}

///
/// In-memory transport shared by a set of mock hosts. `connect` wires a
/// pooled stream pair between two nodes the way the real transport would
/// after a successful dial: both ends land in their node's stream pool,
/// both peers appear in each other's connected set, and inbound frames on
/// either end are dispatched to that node's registered stream handlers.
///
pub struct MockNet {
    directory: Directory,
}

type Directory = Arc<StdRwLock<HashMap<PeerId, MockNode>>>;

/// Everything one mock node owns besides its bus and protocol instances.
#[derive(Clone)]
pub struct MockNode {
    pub host: Arc<MockHost>,
    pub stream_manager: Arc<StreamManager>,
    pub peer_info_manager: Arc<PeerInfoManager>,
}

impl MockNet {
    pub fn new() -> MockNet {
        MockNet {
            directory: Arc::new(StdRwLock::new(HashMap::new())),
        }
    }

    pub fn add_node(&self) -> MockNode {
        let host = Arc::new(MockHost::new(self.directory.clone()));
        let node = MockNode {
            host: host.clone(),
            stream_manager: Arc::new(StreamManager::new()),
            peer_info_manager: Arc::new(PeerInfoManager::new()),
        };
        self.directory
            .write()
            .unwrap()
            .insert(host.local_peer_id(), node.clone());
        node
    }

    fn node(&self, peer: &PeerId) -> MockNode {
        self.directory
            .read()
            .unwrap()
            .get(peer)
            .cloned()
            .expect("unknown mock peer")
    }

    /// Wires a pooled, handler-dispatched stream pair between `a` and `b`.
    /// Returns `a`'s end so tests can break it for fault injection.
    pub async fn connect(&self, a: &PeerId, b: &PeerId) -> Arc<MockStream> {
        let node_a = self.node(a);
        let node_b = self.node(b);
        let (a_end, b_end) = MockStream::pair(b.clone(), a.clone());
        spawn_dispatch(a_end.clone(), node_a.host.clone());
        spawn_dispatch(b_end.clone(), node_b.host.clone());
        node_a.stream_manager.add_stream(a_end.clone() as DynStream).await;
        node_b.stream_manager.add_stream(b_end as DynStream).await;
        node_a.host.add_peer(b.clone());
        node_b.host.add_peer(a.clone());
        a_end
    }
}

impl Default for MockNet {
    fn default() -> MockNet {
        MockNet::new()
    }
}

///
/// Transport host double: a real identity, a handler table filled by
/// `ProtocolManager::init`, and a directory lookup standing in for dialing.
/// Streams to peers named in `refuse_streams_to` fail to open, which is how
/// tests simulate unreachable peers.
///
pub struct MockHost {
    peer_id: PeerId,
    pubkey: NodePublicKey,
    addrs: Vec<String>,
    handlers: StdRwLock<HashMap<String, Arc<dyn StreamHandler>>>,
    peers: StdRwLock<Vec<PeerId>>,
    refused: StdRwLock<HashSet<PeerId>>,
    directory: Directory,
}

impl MockHost {
    fn new(directory: Directory) -> MockHost {
        let (pubkey, _privkey) = generate_keys();
        let peer_id = PeerId::from_pubkey(&pubkey);
        let addrs = vec![format!("/mock/{}", peer_id)];
        MockHost {
            peer_id,
            pubkey,
            addrs,
            handlers: StdRwLock::new(HashMap::new()),
            peers: StdRwLock::new(Vec::new()),
            refused: StdRwLock::new(HashSet::new()),
            directory,
        }
    }

    pub fn add_peer(&self, peer: PeerId) {
        self.peers.write().unwrap().push(peer);
    }

    pub fn set_connected_peers(&self, peers: Vec<PeerId>) {
        *self.peers.write().unwrap() = peers;
    }

    pub fn refuse_streams_to(&self, peer: &PeerId) {
        self.refused.write().unwrap().insert(peer.clone());
    }

    fn handler(&self, message_type: &str) -> Option<Arc<dyn StreamHandler>> {
        self.handlers.read().unwrap().get(message_type).cloned()
    }
}

#[async_trait]
impl Host for MockHost {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn local_pubkey(&self) -> NodePublicKey {
        self.pubkey
    }

    fn listen_addrs(&self) -> Vec<String> {
        self.addrs.clone()
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.read().unwrap().clone()
    }

    async fn new_stream(&self, peer: &PeerId, message_type: &str) -> Result<DynStream> {
        if self.refused.read().unwrap().contains(peer) {
            return Err(Error::Transport(format!("stream to {} refused", peer)));
        }
        let remote = self
            .directory
            .read()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no route to {}", peer)))?;
        let (local_end, remote_end) = MockStream::pair(peer.clone(), self.peer_id.clone());
        local_end.set_protocol(message_type);
        // the responder's end is handler-dispatched; the initiator reads
        // its end manually
        spawn_dispatch(remote_end, remote.host.clone());
        Ok(local_end as DynStream)
    }

    fn set_stream_handler(&self, message_type: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(message_type.to_string(), handler);
    }
}

///
/// One end of an in-memory stream pair. Frames travel with the sender's
/// message-type tag so the receiving side can retag and dispatch like the
/// real transport. `break_link` makes every later send fail.
///
pub struct MockStream {
    remote: PeerId,
    protocol: StdMutex<String>,
    outbound: mpsc::UnboundedSender<(String, Vec<u8>)>,
    inbound: TokioMutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
    broken: AtomicBool,
}

impl MockStream {
    /// Returns (end held by the node facing `remote_of_first`, end held by
    /// the node facing `remote_of_second`).
    pub fn pair(
        remote_of_first: PeerId,
        remote_of_second: PeerId,
    ) -> (Arc<MockStream>, Arc<MockStream>) {
        let (first_tx, second_rx) = mpsc::unbounded_channel();
        let (second_tx, first_rx) = mpsc::unbounded_channel();
        let first = Arc::new(MockStream {
            remote: remote_of_first,
            protocol: StdMutex::new(String::new()),
            outbound: first_tx,
            inbound: TokioMutex::new(first_rx),
            broken: AtomicBool::new(false),
        });
        let second = Arc::new(MockStream {
            remote: remote_of_second,
            protocol: StdMutex::new(String::new()),
            outbound: second_tx,
            inbound: TokioMutex::new(second_rx),
            broken: AtomicBool::new(false),
        });
        (first, second)
    }

    pub fn break_link(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerStream for MockStream {
    fn remote_peer(&self) -> PeerId {
        self.remote.clone()
    }

    fn protocol(&self) -> String {
        self.protocol.lock().unwrap().clone()
    }

    fn set_protocol(&self, message_type: &str) {
        *self.protocol.lock().unwrap() = message_type.to_string();
    }

    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Transport(String::from("mock stream broken")));
        }
        self.outbound
            .send((self.protocol(), frame))
            .map_err(|_| Error::Transport(String::from("mock stream closed")))
    }

    async fn read_frame(&self) -> Result<Vec<u8>> {
        match self.inbound.lock().await.recv().await {
            Some((_tag, frame)) => Ok(frame),
            None => Err(Error::Transport(String::from("mock stream closed"))),
        }
    }
}

/// Pumps inbound frames on `stream` into `host`'s registered handlers,
/// retagging the stream with each frame's message type first.
fn spawn_dispatch(stream: Arc<MockStream>, host: Arc<MockHost>) {
    tokio::spawn(async move {
        loop {
            let next = {
                let mut inbound = stream.inbound.lock().await;
                inbound.recv().await
            };
            match next {
                Some((message_type, payload)) => {
                    stream.set_protocol(&message_type);
                    if let Some(handler) = host.handler(&message_type) {
                        if handler.verify_request(&payload) {
                            handler.handle(payload, stream.clone() as DynStream).await;
                        }
                    }
                }
                None => break,
            }
        }
    });
}

/// Scripted mempool subsystem. `None` consumes requests without answering,
/// so callers observe a failed query without waiting out a timeout.
pub fn spawn_mempool_responder(mut requests: mpsc::Receiver<MempoolRequest>, size: Option<i32>) {
    tokio::spawn(async move {
        while let Some(MempoolRequest::GetMempoolSize { reply }) = requests.recv().await {
            if let Some(size) = size {
                let _ = reply.send(size);
            }
        }
    });
}

/// Scripted chain subsystem, same failure convention as the mempool one.
pub fn spawn_chain_responder(mut requests: mpsc::Receiver<ChainRequest>, header: Option<BlockHeader>) {
    tokio::spawn(async move {
        while let Some(ChainRequest::GetLastHeader { reply }) = requests.recv().await {
            if let Some(header) = header.clone() {
                let _ = reply.send(header);
            }
        }
    });
}

/// A bus with both subsystem responders already scripted.
pub fn scripted_bus(
    header: Option<BlockHeader>,
    mempool_size: Option<i32>,
) -> (BusClient, mpsc::Sender<NetworkEvent>) {
    let (bus, handles) = node_bus(8);
    let SubsystemHandles {
        mempool,
        chain,
        network_events,
    } = handles;
    spawn_mempool_responder(mempool, mempool_size);
    spawn_chain_responder(chain, header);
    (bus, network_events)
}

/// Shared context for a mock node backed by a scripted bus.
pub fn node_context(
    node: &MockNode,
    config: P2pConfig,
    header: Option<BlockHeader>,
    mempool_size: Option<i32>,
) -> (Arc<ProtocolContext>, mpsc::Sender<NetworkEvent>) {
    let (bus, network_events) = scripted_bus(header, mempool_size);
    let context = Arc::new(ProtocolContext::new(
        config,
        bus,
        node.host.clone() as Arc<dyn Host>,
        node.stream_manager.clone(),
        node.peer_info_manager.clone(),
    ));
    (context, network_events)
}

/// One fully wired node: mock transport, scripted bus, standard registry.
pub struct TestNode {
    pub node: MockNode,
    pub context: Arc<ProtocolContext>,
    pub manager: ProtocolManager,
    pub network_events: mpsc::Sender<NetworkEvent>,
}

pub async fn start_test_node(
    net: &MockNet,
    config: P2pConfig,
    header: Option<BlockHeader>,
    mempool_size: Option<i32>,
) -> TestNode {
    let node = net.add_node();
    let (context, network_events) = node_context(&node, config, header, mempool_size);
    let manager = ProtocolManager::init(&standard_registry(), context.clone()).await;
    TestNode {
        node,
        context,
        manager,
        network_events,
    }
}

/// Polls `condition` every 10ms for up to 5s. Returns whether it held.
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}
