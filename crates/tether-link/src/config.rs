//! # Link Configuration
//!
//! Configuration management for the link layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TETHER_AUTO_RECONNECT=false                                        │
//! │     TETHER_RECONNECT_DELAY_SECS=10                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tether/link.toml (Linux)                                 │
//! │     ~/Library/Application Support/io.tether.tether/link.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # link.toml
//! [connection]
//! auto_reconnect = true
//! reconnect_delay_secs = 5
//! connect_timeout_secs = 10
//!
//! [availability]
//! check_delay_secs = 30
//! max_attempts = 10
//! probe_timeout_secs = 5
//!
//! [history]
//! buffer_max = 1000
//! buffer_release = 500
//! file_max = 100000
//! file_release = 50000
//!
//! [framing]
//! charset = "utf8"     # utf8 | ascii | latin1
//! delimiter = "\r\n"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tether_store::BufferThresholds;

use crate::error::{LinkError, LinkResult};
use crate::framing::{Charset, Framing};

// =============================================================================
// Connection Settings
// =============================================================================

/// Reconnect and timeout behavior for peers and the cloud uplink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Whether network failures schedule automatic retries.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Fixed delay between reconnection attempts (seconds).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Connection + handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            auto_reconnect: true,
            reconnect_delay_secs: default_reconnect_delay(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ConnectionSettings {
    /// Reconnect delay as a Duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Availability Settings
// =============================================================================

/// Gateway availability checking (broker side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    /// Fixed delay between health probes of a failing gateway (seconds).
    #[serde(default = "default_check_delay")]
    pub check_delay_secs: u64,

    /// Failed probes tolerated before a gateway is removed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-probe timeout (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_check_delay() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    10
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        AvailabilitySettings {
            check_delay_secs: default_check_delay(),
            max_attempts: default_max_attempts(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

// =============================================================================
// History Settings
// =============================================================================

/// The four staged-buffer thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Maximum in-memory entries before a flush is forced.
    #[serde(default = "default_buffer_max")]
    pub buffer_max: usize,

    /// Entries left in memory after a flush.
    #[serde(default = "default_buffer_release")]
    pub buffer_release: usize,

    /// Maximum entries on file before a compaction is forced.
    #[serde(default = "default_file_max")]
    pub file_max: usize,

    /// Entries left on file after a compaction.
    #[serde(default = "default_file_release")]
    pub file_release: usize,
}

fn default_buffer_max() -> usize {
    1_000
}

fn default_buffer_release() -> usize {
    500
}

fn default_file_max() -> usize {
    100_000
}

fn default_file_release() -> usize {
    50_000
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            buffer_max: default_buffer_max(),
            buffer_release: default_buffer_release(),
            file_max: default_file_max(),
            file_release: default_file_release(),
        }
    }
}

impl HistorySettings {
    /// Converts to the store's threshold struct.
    pub fn thresholds(&self) -> BufferThresholds {
        BufferThresholds {
            buffer_max: self.buffer_max,
            buffer_release: self.buffer_release,
            file_max: self.file_max,
            file_release: self.file_release,
        }
    }
}

// =============================================================================
// Framing Settings
// =============================================================================

/// Default message framing for new connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingSettings {
    /// Charset name: utf8 | ascii | latin1.
    #[serde(default = "default_charset")]
    pub charset: String,

    /// Message delimiter; the string's bytes terminate each message.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_charset() -> String {
    "utf8".to_string()
}

fn default_delimiter() -> String {
    "\r\n".to_string()
}

impl Default for FramingSettings {
    fn default() -> Self {
        FramingSettings {
            charset: default_charset(),
            delimiter: default_delimiter(),
        }
    }
}

impl FramingSettings {
    /// Builds the framing from the configured charset and delimiter.
    pub fn framing(&self) -> LinkResult<Framing> {
        let charset: Charset = self.charset.parse()?;
        Framing::new(charset, self.delimiter.as_bytes())
    }
}

// =============================================================================
// Link Configuration
// =============================================================================

/// The recognized configuration surface of the link layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Reconnect/timeout behavior.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Gateway availability checking.
    #[serde(default)]
    pub availability: AvailabilitySettings,

    /// History buffer thresholds.
    #[serde(default)]
    pub history: HistorySettings,

    /// Default message framing.
    #[serde(default)]
    pub framing: FramingSettings,
}

impl LinkConfig {
    /// Default config file path (`<config dir>/tether/link.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "tether", "tether")
            .map(|dirs| dirs.config_dir().join("link.toml"))
    }

    /// Loads from the given path (or the default location), falling back
    /// to defaults when the file is missing, then applies environment
    /// overrides.
    pub fn load_or_default(path: Option<PathBuf>) -> LinkResult<Self> {
        let path = path.or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| LinkError::Config(format!("read {}: {}", path.display(), e)))?;
                let config: LinkConfig = toml::from_str(&text)
                    .map_err(|e| LinkError::Config(format!("parse {}: {}", path.display(), e)))?;
                debug!(path = %path.display(), "Link config loaded");
                config
            }
            _ => {
                debug!("No link config file - using defaults");
                LinkConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `TETHER_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TETHER_AUTO_RECONNECT") {
            match value.parse() {
                Ok(parsed) => self.connection.auto_reconnect = parsed,
                Err(_) => warn!(%value, "Ignoring invalid TETHER_AUTO_RECONNECT"),
            }
        }
        if let Ok(value) = std::env::var("TETHER_RECONNECT_DELAY_SECS") {
            match value.parse() {
                Ok(parsed) => self.connection.reconnect_delay_secs = parsed,
                Err(_) => warn!(%value, "Ignoring invalid TETHER_RECONNECT_DELAY_SECS"),
            }
        }
        if let Ok(value) = std::env::var("TETHER_AVAILABILITY_MAX_ATTEMPTS") {
            match value.parse() {
                Ok(parsed) => self.availability.max_attempts = parsed,
                Err(_) => warn!(%value, "Ignoring invalid TETHER_AVAILABILITY_MAX_ATTEMPTS"),
            }
        }
        if let Ok(value) = std::env::var("TETHER_CHARSET") {
            self.framing.charset = value;
        }
        if let Ok(value) = std::env::var("TETHER_DELIMITER") {
            self.framing.delimiter = value;
        }
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> LinkResult<()> {
        if self.history.buffer_release > self.history.buffer_max {
            return Err(LinkError::Config(
                "history.buffer_release exceeds history.buffer_max".to_string(),
            ));
        }
        if self.history.file_release > self.history.file_max {
            return Err(LinkError::Config(
                "history.file_release exceeds history.file_max".to_string(),
            ));
        }
        if self.availability.max_attempts == 0 {
            return Err(LinkError::Config(
                "availability.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.framing.delimiter.is_empty() {
            return Err(LinkError::Config("framing.delimiter is empty".to_string()));
        }
        // Surface charset typos at load time, not at connect time.
        self.framing.framing()?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.availability.max_attempts, 10);
        assert_eq!(config.history.buffer_max, 1_000);
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [connection]
            auto_reconnect = false
            reconnect_delay_secs = 9

            [history]
            buffer_max = 10
            buffer_release = 4

            [framing]
            charset = "latin1"
            delimiter = ";;"
        "#;

        let config: LinkConfig = toml::from_str(text).unwrap();
        assert!(!config.connection.auto_reconnect);
        assert_eq!(config.connection.reconnect_delay_secs, 9);
        assert_eq!(config.history.buffer_max, 10);
        assert_eq!(config.history.buffer_release, 4);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.availability.max_attempts, 10);

        let framing = config.framing.framing().unwrap();
        assert_eq!(framing.charset, Charset::Latin1);
        assert_eq!(framing.delimiter, b";;".to_vec());
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut config = LinkConfig::default();
        config.history.buffer_release = config.history.buffer_max + 1;
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.framing.delimiter = String::new();
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.framing.charset = "ebcdic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_history_thresholds_conversion() {
        let config = LinkConfig::default();
        let thresholds = config.history.thresholds();
        assert_eq!(thresholds.buffer_max, 1_000);
        assert_eq!(thresholds.file_release, 50_000);
    }
}
