use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::message_types::peer_info_messages::PeerList;
use crate::types::BlockHeader;
use crate::{Error, Result};

/// How long a bus send may wait for channel capacity.
pub const BUS_SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a caller waits for a subsystem's reply.
pub const BUS_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// The chain subsystem may be busy applying blocks, so the last-header
/// request gets a much longer send window than other bus traffic.
pub const HEADER_SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Requests answered by the mempool subsystem.
#[derive(Debug)]
pub enum MempoolRequest {
    GetMempoolSize { reply: oneshot::Sender<i32> },
}

/// Requests answered by the chain subsystem.
#[derive(Debug)]
pub enum ChainRequest {
    GetLastHeader { reply: oneshot::Sender<BlockHeader> },
}

/// Events other subsystems publish to the peer network.
#[derive(Debug)]
pub enum NetworkEvent {
    GetPeerList { reply: oneshot::Sender<PeerList> },
}

///
/// Creates the internal bus connecting the peer network to the rest of the
/// node. Returns the client handed to the protocols plus the handles the
/// other subsystems (or test responders) answer on.
///
pub fn node_bus(buffer: usize) -> (BusClient, SubsystemHandles) {
    let (mempool_sender, mempool_receiver) = mpsc::channel(buffer);
    let (chain_sender, chain_receiver) = mpsc::channel(buffer);
    let (network_event_sender, network_event_receiver) = mpsc::channel(buffer);

    let client = BusClient {
        mempool: mempool_sender,
        chain: chain_sender,
        network_events: Arc::new(Mutex::new(Some(network_event_receiver))),
    };
    let handles = SubsystemHandles {
        mempool: mempool_receiver,
        chain: chain_receiver,
        network_events: network_event_sender,
    };
    (client, handles)
}

/// The subsystem-facing ends of the bus.
pub struct SubsystemHandles {
    pub mempool: mpsc::Receiver<MempoolRequest>,
    pub chain: mpsc::Receiver<ChainRequest>,
    pub network_events: mpsc::Sender<NetworkEvent>,
}

///
/// The peer network's handle on the internal bus. Every query is bounded by
/// a send timeout and a reply timeout; callers substitute defaults on
/// failure rather than propagating it upward.
///
#[derive(Clone)]
pub struct BusClient {
    mempool: mpsc::Sender<MempoolRequest>,
    chain: mpsc::Sender<ChainRequest>,
    network_events: Arc<Mutex<Option<mpsc::Receiver<NetworkEvent>>>>,
}

impl BusClient {
    pub async fn fetch_mempool_size(&self) -> Result<i32> {
        let (reply, reply_receiver) = oneshot::channel();
        self.mempool
            .send_timeout(MempoolRequest::GetMempoolSize { reply }, BUS_SEND_TIMEOUT)
            .await
            .map_err(|err| Error::Bus(err.to_string()))?;
        timeout(BUS_REPLY_TIMEOUT, reply_receiver)
            .await
            .map_err(|_| Error::Timeout("mempool size reply"))?
            .map_err(|err| Error::Bus(err.to_string()))
    }

    pub async fn fetch_last_header(&self) -> Result<BlockHeader> {
        let (reply, reply_receiver) = oneshot::channel();
        self.chain
            .send_timeout(ChainRequest::GetLastHeader { reply }, HEADER_SEND_TIMEOUT)
            .await
            .map_err(|err| Error::Bus(err.to_string()))?;
        timeout(BUS_REPLY_TIMEOUT, reply_receiver)
            .await
            .map_err(|_| Error::Timeout("last header reply"))?
            .map_err(|err| Error::Bus(err.to_string()))
    }

    ///
    /// Hands the network-event receiver to its single subscriber (the
    /// peer-info protocol's event bridge). Taking it twice is a wiring
    /// mistake and panics.
    ///
    pub fn take_network_events(&self) -> mpsc::Receiver<NetworkEvent> {
        self.network_events
            .lock()
            .expect("network event receiver lock poisoned")
            .take()
            .expect("network event receiver already taken")
    }
}
