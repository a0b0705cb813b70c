use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current unix timestamp in seconds, used to stamp envelopes.
pub fn create_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
