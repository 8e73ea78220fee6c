use crate::defaults::{
    EQUALIZER_BANDS, EQUALIZER_CHANNELS, EQUALIZER_DEFAULT_GAIN_TABLE, EQUALIZER_MIN_GAIN_DB,
    EVENT_QUEUE_CAPACITY, LINK_CAPACITY, POLL_INTERVAL_MS, STOP_TIMEOUT_MS, WIRELESS_DEVICE_NAME,
    WIRELESS_REMOTE_NAME, WIRELESS_SOURCE_NAME,
};
use crate::error::{PlayerError, Result};
use crate::pipeline::types::{CodecKind, OutputKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub player: PlayerConfig,
    pub stream: StreamConfig,
    pub wireless: WirelessConfig,
    pub equalizer: EqualizerConfig,
}

/// Pipeline shape and timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub output: OutputKind,
    pub equalizer: bool,
    pub event_queue_capacity: usize,
    pub link_capacity: usize,
    pub stop_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

/// Network stream to play
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StreamConfig {
    pub url: Option<String>,
    pub codec: CodecKind,
}

/// Names used when bringing up the short-range wireless subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WirelessConfig {
    /// Advertised name when receiving audio.
    pub device_name: String,
    /// Own name when sending audio.
    pub source_name: String,
    /// Remote speaker to connect to when sending audio.
    pub remote_name: String,
}

/// Per-band equalizer gains in dB, all bands of channel 0 then channel 1
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EqualizerConfig {
    pub gains: Vec<i32>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            output: OutputKind::LocalOutput,
            equalizer: true,
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            link_capacity: LINK_CAPACITY,
            stop_timeout_ms: STOP_TIMEOUT_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl PlayerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            device_name: WIRELESS_DEVICE_NAME.to_string(),
            source_name: WIRELESS_SOURCE_NAME.to_string(),
            remote_name: WIRELESS_REMOTE_NAME.to_string(),
        }
    }
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            gains: EQUALIZER_DEFAULT_GAIN_TABLE.to_vec(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. The result is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML and invalid values are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(PlayerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - NETPLAYER_URL → stream.url
    /// - NETPLAYER_CODEC → stream.codec
    /// - NETPLAYER_OUTPUT → player.output
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("NETPLAYER_URL")
            && !url.is_empty()
        {
            self.stream.url = Some(url);
        }

        if let Ok(codec) = std::env::var("NETPLAYER_CODEC")
            && !codec.is_empty()
        {
            match codec.parse() {
                Ok(codec) => self.stream.codec = codec,
                Err(e) => warn!("ignoring NETPLAYER_CODEC: {e}"),
            }
        }

        if let Ok(output) = std::env::var("NETPLAYER_OUTPUT")
            && !output.is_empty()
        {
            match output.parse() {
                Ok(output) => self.player.output = output,
                Err(e) => warn!("ignoring NETPLAYER_OUTPUT: {e}"),
            }
        }

        self
    }

    /// Checks values that would make the player unusable.
    pub fn validate(&self) -> Result<()> {
        let expected = EQUALIZER_BANDS * EQUALIZER_CHANNELS;
        if self.equalizer.gains.len() != expected {
            return Err(config_error(format!(
                "equalizer.gains must have {expected} entries, found {}",
                self.equalizer.gains.len()
            )));
        }
        if let Some(gain) = self
            .equalizer
            .gains
            .iter()
            .find(|&&gain| gain < EQUALIZER_MIN_GAIN_DB)
        {
            return Err(config_error(format!(
                "equalizer gain {gain} dB is below the minimum of {EQUALIZER_MIN_GAIN_DB} dB"
            )));
        }
        if self.player.event_queue_capacity == 0 {
            return Err(config_error("player.event_queue_capacity must be non-zero"));
        }
        if self.player.link_capacity == 0 {
            return Err(config_error("player.link_capacity must be non-zero"));
        }
        if self.player.stop_timeout_ms == 0 {
            return Err(config_error("player.stop_timeout_ms must be non-zero"));
        }
        if self.player.poll_interval_ms == 0 {
            return Err(config_error("player.poll_interval_ms must be non-zero"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/netplayer/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| config_error("could not determine config directory"))?;
        Ok(dir.join("netplayer").join("config.toml"))
    }
}

fn config_error(message: impl Into<String>) -> PlayerError {
    PlayerError::Config {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_netplayer_env() {
        remove_env("NETPLAYER_URL");
        remove_env("NETPLAYER_CODEC");
        remove_env("NETPLAYER_OUTPUT");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.player.output, OutputKind::LocalOutput);
        assert!(config.player.equalizer);
        assert_eq!(config.player.event_queue_capacity, 16);
        assert_eq!(config.player.stop_timeout(), Duration::from_secs(2));

        assert_eq!(config.stream.url, None);
        assert_eq!(config.stream.codec, CodecKind::None);

        assert_eq!(config.wireless.device_name, "NetPlayer");
        assert_eq!(config.wireless.source_name, "ESP-ADF-SOURCE");
        assert_eq!(config.wireless.remote_name, "DL-LINK");

        assert_eq!(
            config.equalizer.gains,
            vec![10, 10, 8, 4, 2, 0, 0, 2, 4, 6, 10, 10, 8, 4, 2, 0, 0, 2, 4, 6]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_config(
            r#"
            [player]
            output = "wireless"
            equalizer = false
            stop_timeout_ms = 500

            [stream]
            url = "http://radio.example/live.m3u"
            codec = "aac"

            [wireless]
            remote_name = "Kitchen"
        "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.player.output, OutputKind::WirelessSource);
        assert!(!config.player.equalizer);
        assert_eq!(config.player.stop_timeout(), Duration::from_millis(500));
        assert_eq!(config.player.link_capacity, LINK_CAPACITY);
        assert_eq!(config.stream.url.as_deref(), Some("http://radio.example/live.m3u"));
        assert_eq!(config.stream.codec, CodecKind::Aac);
        assert_eq!(config.wireless.remote_name, "Kitchen");
        assert_eq!(config.wireless.source_name, "ESP-ADF-SOURCE");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_invalid_toml_is_error() {
        let file = write_config("[player\noutput = ");
        let result = Config::load_or_default(file.path());
        assert!(matches!(result, Err(PlayerError::Toml(_))));
    }

    #[test]
    fn test_unknown_output_is_rejected() {
        let file = write_config("[player]\noutput = \"hdmi\"\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_validate_gain_table_length() {
        let mut config = Config::default();
        config.equalizer.gains.truncate(10);
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("must have 20 entries"));
    }

    #[test]
    fn test_validate_gain_minimum() {
        let mut config = Config::default();
        config.equalizer.gains[3] = -14;
        assert!(config.validate().is_err());

        config.equalizer.gains[3] = -13;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = Config::default();
        config.player.link_capacity = 0;
        assert!(matches!(config.validate(), Err(PlayerError::Config { .. })));
    }

    #[test]
    fn test_validate_zero_stop_timeout() {
        let mut config = Config::default();
        config.player.stop_timeout_ms = 0;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("stop_timeout_ms"));

        config.player.stop_timeout_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_validates() {
        let file = write_config("[player]\nevent_queue_capacity = 0\n");
        assert!(matches!(Config::load(file.path()), Err(PlayerError::Config { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_netplayer_env();

        set_env("NETPLAYER_URL", "http://env.example/stream");
        set_env("NETPLAYER_CODEC", "mp3");
        set_env("NETPLAYER_OUTPUT", "a2dp");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.stream.url.as_deref(), Some("http://env.example/stream"));
        assert_eq!(config.stream.codec, CodecKind::Mp3);
        assert_eq!(config.player.output, OutputKind::WirelessSource);

        clear_netplayer_env();
    }

    #[test]
    fn test_env_overrides_ignore_empty_and_invalid() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_netplayer_env();

        set_env("NETPLAYER_URL", "");
        set_env("NETPLAYER_CODEC", "flac");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.stream.url, None);
        assert_eq!(config.stream.codec, CodecKind::None);

        clear_netplayer_env();
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_path_ends_with_netplayer() {
        if let Ok(path) = Config::default_path() {
            assert!(path.ends_with("netplayer/config.toml"));
        }
    }
}
