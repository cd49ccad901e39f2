//! Player configuration for scrub-player
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/scrub/player.yaml

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use scrub_core::audio::AudioConfig;
use scrub_core::config::{default_config_path, load_config, MeterConfig, TransportConfig};

const CONFIG_FILENAME: &str = "player.yaml";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Backend order, device and buffer settings
    pub audio: AudioConfig,
    /// Level meters and spectrum analysis
    pub meters: MeterConfig,
    /// Prebuffer depth, loop gap and skip margins
    pub transport: TransportConfig,
}

impl PlayerConfig {
    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(path) => load_config(path),
            None => load_config(&default_config_file()),
        }
    }
}

pub fn default_config_file() -> PathBuf {
    default_config_path(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrub_core::audio::BackendKind;
    use scrub_core::config::save_config;

    #[test]
    fn test_default_file_location() {
        assert!(default_config_file().ends_with("scrub/player.yaml"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = PlayerConfig::load(Some(Path::new("/nonexistent/scrub/player.yaml")));
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn test_sections_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.yaml");

        let mut config = PlayerConfig::default();
        config.audio.backends = vec![BackendKind::Null];
        config.meters.frequency_analysis = false;
        config.transport.prebuffer_chunks = 8;

        save_config(&config, &path).unwrap();
        assert_eq!(PlayerConfig::load(Some(&path)), config);
    }

    #[test]
    fn test_backend_order_from_yaml() {
        let yaml = "audio:\n  backends: [cpal, null]\n  sample_rate: 48000\n";
        let config: PlayerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.audio.backends, vec![BackendKind::Cpal, BackendKind::Null]);
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.transport, TransportConfig::default());
    }
}
