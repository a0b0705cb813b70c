use std::sync::Arc;

use indexmap::IndexMap;

use crate::protocol::{Protocol, ProtocolContext, StreamHandler};

pub type ProtocolFactory = Box<dyn Fn(Arc<ProtocolContext>) -> Arc<dyn Protocol> + Send + Sync>;
pub type HandlerFactory = Box<dyn Fn() -> Arc<dyn StreamHandler> + Send + Sync>;

///
/// Mutable registration phase of the protocol table. Registration is a
/// startup-time contract: a duplicate protocol identifier, a duplicate
/// (protocol, message-type) pair or a handler naming an unknown protocol is
/// a wiring mistake and panics rather than returning an error.
///
/// The lifecycle is explicit: build, populate, `freeze`, then hand the
/// frozen registry to however many node instances need it.
///
pub struct ProtocolRegistryBuilder {
    protocols: IndexMap<String, ProtocolFactory>,
    handlers: IndexMap<(String, String), HandlerFactory>,
}

impl ProtocolRegistryBuilder {
    pub fn new() -> ProtocolRegistryBuilder {
        ProtocolRegistryBuilder {
            protocols: IndexMap::new(),
            handlers: IndexMap::new(),
        }
    }

    pub fn register_protocol<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(Arc<ProtocolContext>) -> Arc<dyn Protocol> + Send + Sync + 'static,
    {
        if self
            .protocols
            .insert(id.to_string(), Box::new(factory))
            .is_some()
        {
            panic!("register_protocol: protocol {} registered twice", id);
        }
    }

    pub fn register_stream_handler<F>(&mut self, protocol_id: &str, message_type: &str, factory: F)
    where
        F: Fn() -> Arc<dyn StreamHandler> + Send + Sync + 'static,
    {
        let key = (protocol_id.to_string(), message_type.to_string());
        if self.handlers.insert(key, Box::new(factory)).is_some() {
            panic!(
                "register_stream_handler: handler for {} / {} registered twice",
                protocol_id, message_type
            );
        }
    }

    /// Ends the registration phase. Panics if any handler references a
    /// protocol identifier that was never registered.
    pub fn freeze(self) -> ProtocolRegistry {
        for (protocol_id, message_type) in self.handlers.keys() {
            if !self.protocols.contains_key(protocol_id) {
                panic!(
                    "freeze: handler for {} references unknown protocol {}",
                    message_type, protocol_id
                );
            }
        }
        ProtocolRegistry {
            protocols: self.protocols,
            handlers: self.handlers,
        }
    }
}

impl Default for ProtocolRegistryBuilder {
    fn default() -> ProtocolRegistryBuilder {
        ProtocolRegistryBuilder::new()
    }
}

/// Immutable protocol table consumed by `ProtocolManager::init`.
pub struct ProtocolRegistry {
    protocols: IndexMap<String, ProtocolFactory>,
    handlers: IndexMap<(String, String), HandlerFactory>,
}

impl ProtocolRegistry {
    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn protocols(&self) -> impl Iterator<Item = (&String, &ProtocolFactory)> {
        self.protocols.iter()
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = (&(String, String), &HandlerFactory)> {
        self.handlers.iter()
    }
}
