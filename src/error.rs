use thiserror::Error;

/// Crate-wide result alias, re-exported at the crate root.
pub type Result<T> = std::result::Result<T, Error>;

///
/// Failures this crate can produce. Transport, bus and decode failures are
/// runtime conditions handled by the caller (usually by logging and moving on
/// to the next peer or the next loop tick). Wiring mistakes such as duplicate
/// registry entries are not represented here: those panic at startup.
///
#[derive(Error, Debug)]
pub enum Error {
    /// Stream open/read/write failure reported by the transport.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A bounded wait expired before the operation completed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Malformed payload bytes. Inbound handlers drop these silently.
    #[error("payload decode failed: {0}")]
    Decode(#[from] bincode::Error),

    /// The internal bus refused or dropped a request.
    #[error("bus request failed: {0}")]
    Bus(String),

    /// A peer answered with the error variant of a tagged-union response.
    #[error("peer returned error: {0}")]
    PeerResponse(String),
}
