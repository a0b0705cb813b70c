use std::fmt;

use base58::ToBase58;
use secp256k1::SECP256K1;
use serde::{Deserialize, Serialize};

pub type NodePublicKey = [u8; 33];
pub type NodePrivateKey = [u8; 32];

pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

pub fn generate_keys() -> (NodePublicKey, NodePrivateKey) {
    let (secret_key, public_key) =
        SECP256K1.generate_keypair(&mut secp256k1::rand::thread_rng());
    let mut secret_bytes = [0u8; 32];
    secret_bytes.copy_from_slice(&secret_key[..]);
    (public_key.serialize(), secret_bytes)
}

///
/// Peer identity in its display form: the base58 rendering of the blake3 hash
/// of the node's compressed public key. Keys the stream pool and the peer-info
/// cache, and is stamped into every outbound envelope.
///
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn from_pubkey(pubkey: &NodePublicKey) -> PeerId {
        PeerId(hash(pubkey).to_base58())
    }

    /// A fresh identity with no associated host, handy in tests.
    pub fn random() -> PeerId {
        let (pubkey, _privkey) = generate_keys();
        PeerId::from_pubkey(&pubkey)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
