use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

use crate::protocol::{Protocol, ProtocolContext, ProtocolRegistry};

///
/// Per-node-instance owner of the live protocol set. `init` walks the frozen
/// registry, constructs exactly one protocol instance per identifier, runs
/// each instance's lifecycle hook, then constructs every stream handler,
/// links it to its owning protocol and binds it to the transport's inbound
/// dispatch. One-shot: re-running `init` on the same context is not
/// supported.
///
pub struct ProtocolManager {
    protocols: IndexMap<String, Arc<dyn Protocol>>,
    context: Arc<ProtocolContext>,
}

impl ProtocolManager {
    pub async fn init(
        registry: &ProtocolRegistry,
        context: Arc<ProtocolContext>,
    ) -> ProtocolManager {
        let mut protocols: IndexMap<String, Arc<dyn Protocol>> = IndexMap::new();
        for (id, factory) in registry.protocols() {
            let protocol = factory(context.clone());
            protocol.clone().init_protocol().await;
            info!("initialized protocol {}", id);
            protocols.insert(id.clone(), protocol);
        }

        for ((protocol_id, message_type), factory) in registry.handlers() {
            let handler = factory();
            let owner = protocols.get(protocol_id).unwrap_or_else(|| {
                panic!(
                    "handler for {} registered for unknown protocol {}",
                    message_type, protocol_id
                )
            });
            handler.set_protocol(owner.clone());
            context.host.set_stream_handler(message_type, handler);
            info!("bound stream handler {} -> {}", message_type, protocol_id);
        }

        ProtocolManager { protocols, context }
    }

    /// The live instance behind `id`, for introspection and tests.
    pub fn protocol(&self, id: &str) -> Option<&Arc<dyn Protocol>> {
        self.protocols.get(id)
    }

    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }

    /// Stops every protocol background loop. Loops observe the broadcast on
    /// their next select and exit; in-flight handler invocations finish
    /// normally.
    pub fn shutdown(&self) {
        let _ = self.context.shutdown.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::Arc;

    use async_trait::async_trait;
    use once_cell::sync::OnceCell;
    use tokio::sync::{oneshot, Mutex};

    use crate::bus::NetworkEvent;
    use crate::config::P2pConfig;
    use crate::host::{DynStream, Host};
    use crate::protocol::{ProtocolRegistryBuilder, StreamHandler};
    use crate::test_utilities::mocks::{
        make_mock_header, node_context, start_test_node, wait_until, MockNet,
    };

    const PROBE_A_MSG: &str = "/peernet-test/probe-a/1.0.0";
    const PROBE_B_MSG: &str = "/peernet-test/probe-b/1.0.0";

    /// Test-local protocol proving the framework is closed over protocols
    /// it has never heard of: frames are recorded under the owning
    /// protocol's identifier.
    struct ProbeProtocol {
        id: &'static str,
        log: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    }

    #[async_trait]
    impl crate::protocol::Protocol for ProbeProtocol {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn init_protocol(self: Arc<Self>) {}

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct ProbeHandler {
        protocol: OnceCell<Arc<ProbeProtocol>>,
    }

    #[async_trait]
    impl StreamHandler for ProbeHandler {
        fn set_protocol(&self, protocol: Arc<dyn crate::protocol::Protocol>) {
            let protocol = protocol
                .as_any_arc()
                .downcast::<ProbeProtocol>()
                .unwrap_or_else(|_| panic!("probe handler linked to a foreign protocol"));
            assert!(self.protocol.set(protocol).is_ok());
        }

        async fn handle(&self, payload: Vec<u8>, _stream: DynStream) {
            let protocol = self.protocol.get().unwrap();
            protocol
                .log
                .lock()
                .await
                .push((protocol.id.to_string(), payload));
        }
    }

    fn probe_registry(log: Arc<Mutex<Vec<(String, Vec<u8>)>>>) -> ProtocolRegistry {
        let mut builder = ProtocolRegistryBuilder::new();
        let log_a = log.clone();
        builder.register_protocol("probe-a", move |_context| {
            Arc::new(ProbeProtocol {
                id: "probe-a",
                log: log_a.clone(),
            }) as Arc<dyn crate::protocol::Protocol>
        });
        let log_b = log;
        builder.register_protocol("probe-b", move |_context| {
            Arc::new(ProbeProtocol {
                id: "probe-b",
                log: log_b.clone(),
            }) as Arc<dyn crate::protocol::Protocol>
        });
        builder.register_stream_handler("probe-a", PROBE_A_MSG, || {
            Arc::new(ProbeHandler {
                protocol: OnceCell::new(),
            }) as Arc<dyn StreamHandler>
        });
        builder.register_stream_handler("probe-b", PROBE_B_MSG, || {
            Arc::new(ProbeHandler {
                protocol: OnceCell::new(),
            }) as Arc<dyn StreamHandler>
        });
        builder.freeze()
    }

    #[tokio::test]
    async fn test_frames_route_to_the_owning_protocols_handler() {
        let net = MockNet::new();
        let receiver = net.add_node();
        let (context, _events) = node_context(
            &receiver,
            P2pConfig::default(),
            Some(make_mock_header(1)),
            Some(0),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ProtocolManager::init(&probe_registry(log.clone()), context).await;
        assert_eq!(manager.protocol_count(), 2);

        let sender = net.add_node();
        let receiver_id = receiver.host.local_peer_id();
        let stream_a = sender
            .host
            .new_stream(&receiver_id, PROBE_A_MSG)
            .await
            .unwrap();
        stream_a.send_frame(vec![0xaa]).await.unwrap();
        let stream_b = sender
            .host
            .new_stream(&receiver_id, PROBE_B_MSG)
            .await
            .unwrap();
        stream_b.send_frame(vec![0xbb]).await.unwrap();

        assert!(
            wait_until(|| {
                let log = log.clone();
                async move { log.lock().await.len() == 2 }
            })
            .await
        );
        let entries = log.lock().await;
        assert!(entries.contains(&(String::from("probe-a"), vec![0xaa])));
        assert!(entries.contains(&(String::from("probe-b"), vec![0xbb])));
        // and never the other way around
        assert!(!entries.contains(&(String::from("probe-a"), vec![0xbb])));
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_event_bridge() {
        let net = MockNet::new();
        let node =
            start_test_node(&net, P2pConfig::default(), Some(make_mock_header(1)), Some(0)).await;

        // bridge is alive: a peer-list event gets answered
        let (reply, reply_receiver) = oneshot::channel();
        node.network_events
            .send(NetworkEvent::GetPeerList { reply })
            .await
            .unwrap();
        assert!(reply_receiver.await.is_ok());

        node.manager.shutdown();

        // once the bridge task exits, the event channel closes
        assert!(
            wait_until(|| {
                let events = node.network_events.clone();
                async move {
                    let (reply, _receiver) = oneshot::channel();
                    events
                        .send(NetworkEvent::GetPeerList { reply })
                        .await
                        .is_err()
                }
            })
            .await
        );
    }
}
