use serde::Deserialize;

///
/// Peer-network settings, read from the `p2p` section of the node's settings
/// file. Every field has a default so the section may be omitted entirely.
/// Timeouts are deliberately not configurable; they are constants owned by
/// the modules that use them.
///
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Protocol version string stamped into every envelope.
    pub version: String,
    /// Seconds between peer-info pushes to the stream pool.
    pub peer_info_interval_secs: u64,
    /// Seconds between fall-behind updates.
    pub health_interval_secs: u64,
    /// Maximum number of peers sampled per fall-behind update.
    pub max_header_query: usize,
}

impl Default for P2pConfig {
    fn default() -> P2pConfig {
        P2pConfig {
            version: String::from(""),
            peer_info_interval_secs: 20,
            health_interval_secs: 30,
            max_header_query: 50,
        }
    }
}

impl P2pConfig {
    pub fn from_settings(settings: &config::Config) -> P2pConfig {
        match settings.get::<P2pConfig>("p2p") {
            Ok(p2p_config) => p2p_config,
            Err(_) => P2pConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_section_missing() {
        let settings = config::Config::default();
        let p2p_config = P2pConfig::from_settings(&settings);
        assert_eq!(p2p_config.peer_info_interval_secs, 20);
        assert_eq!(p2p_config.health_interval_secs, 30);
        assert_eq!(p2p_config.max_header_query, 50);
        assert_eq!(p2p_config.version, "");
    }

    #[test]
    fn test_settings_override_defaults() {
        let mut settings = config::Config::default();
        settings.set("p2p.version", "1.0.0").unwrap();
        settings.set("p2p.max_header_query", 5).unwrap();
        let p2p_config = P2pConfig::from_settings(&settings);
        assert_eq!(p2p_config.version, "1.0.0");
        assert_eq!(p2p_config.max_header_query, 5);
        // untouched fields keep their defaults
        assert_eq!(p2p_config.peer_info_interval_secs, 20);
    }
}
