pub mod peers;
pub mod streams;

pub use peers::PeerInfoManager;
pub use streams::StreamManager;
