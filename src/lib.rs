/*!
# peernet

Protocol substrate for a blockchain node's peer network: a registry/dispatch
framework for typed request/response protocols running over message-type
tagged streams, plus the two concrete protocols built on it — peer-info
exchange and fall-behind (network health) detection.

The transport itself lives behind the [`host::Host`] trait; this crate owns
protocol wiring, correlation-id request/response orchestration, the periodic
polling loops, and the bridge to the node's internal bus.

Registration is explicit: build a [`protocol::ProtocolRegistryBuilder`],
populate it (or take [`protocol::standard_registry`]), freeze it, and hand
it with a shared [`protocol::ProtocolContext`] to
[`protocol::manager::ProtocolManager::init`].
*/

pub mod bus;
pub mod config;
pub mod crypto;
pub mod error;
pub mod host;
pub mod manage;
pub mod message_types;
pub mod protocol;
mod test_setup;
pub mod test_utilities;
pub mod time;
pub mod types;

pub use error::{Error, Result};
