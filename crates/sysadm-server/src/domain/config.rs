//! Server configuration: a TOML file with every field defaulted.
//!
//! # Example file
//!
//! ```toml
//! mode = "wss"
//! bind_address = "0.0.0.0"
//! port = 12150
//! cert_path = "/usr/local/etc/sysadm/wsserver.crt"
//! key_path = "/usr/local/etc/sysadm/wsserver.key"
//! shutdown_grace_secs = 5
//! allowed_origins = ["https://admin.example.org"]
//! auth_tokens = ["..."]
//! log_level = "info"
//! ```
//!
//! A missing file is not an error: [`load_config`] returns
//! [`ServerConfig::default`], so the server runs out of the box with the
//! standard certificate locations.  Leaving `port` out picks the transport's
//! well-known port (see [`TransportMode::default_port`]).

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysadm_core::TransportMode;
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything the server needs to start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Transport to listen with.
    pub mode: TransportMode,
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    pub bind_address: String,
    /// TCP port; `None` means the mode's default port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// PEM certificate presented to peers.
    pub cert_path: PathBuf,
    /// PEM private key matching `cert_path`.
    pub key_path: PathBuf,
    /// How long a WebSocket shutdown waits for sessions to close.
    pub shutdown_grace_secs: u64,
    /// Origins allowed to open a WebSocket.  Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Bearer tokens accepted by the built-in authorizer.
    pub auth_tokens: Vec<String>,
    /// Seconds between `server-status` events.  `0` turns the feed off.
    pub status_interval_secs: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_cert_path() -> PathBuf {
    PathBuf::from("/usr/local/etc/sysadm/wsserver.crt")
}
fn default_key_path() -> PathBuf {
    PathBuf::from("/usr/local/etc/sysadm/wsserver.key")
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_status_interval_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            bind_address: default_bind_address(),
            port: None,
            cert_path: default_cert_path(),
            key_path: default_key_path(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            allowed_origins: Vec::new(),
            auth_tokens: Vec::new(),
            status_interval_secs: default_status_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// The port to bind: the configured one, or the mode's default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.mode.default_port())
    }

    /// Grace period for a WebSocket shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Period of the status feed, or `None` when it is turned off.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

/// Loads the config at `path`, or defaults if there is no file.
///
/// Nothing is logged here; the caller usually has no subscriber yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file exists but cannot be read, or
/// [`ConfigError::Parse`] if it is not valid TOML for [`ServerConfig`].
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_use_standard_certificate_locations() {
        let config = ServerConfig::default();
        assert_eq!(
            config.cert_path,
            PathBuf::from("/usr/local/etc/sysadm/wsserver.crt")
        );
        assert_eq!(
            config.key_path,
            PathBuf::from("/usr/local/etc/sysadm/wsserver.key")
        );
        assert_eq!(config.mode, TransportMode::WebSocketSecure);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_effective_port_follows_mode_when_unset() {
        let mut config = ServerConfig::default();
        assert_eq!(config.effective_port(), 12150);

        config.mode = TransportMode::RawTls;
        assert_eq!(config.effective_port(), 12151);

        config.port = Some(9000);
        assert_eq!(config.effective_port(), 9000);
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_remaining_fields_with_defaults() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"tls\"\nport = 4443\nauth_tokens = [\"t1\"]").unwrap();

        // Act
        let config = load_config(file.path()).unwrap();

        // Assert
        assert_eq!(config.mode, TransportMode::RawTls);
        assert_eq!(config.effective_port(), 4443);
        assert_eq!(config.auth_tokens, vec!["t1".to_string()]);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_status_interval_turns_feed_off() {
        let mut config = ServerConfig::default();
        assert_eq!(config.status_interval(), Some(Duration::from_secs(60)));

        config.status_interval_secs = 0;
        assert_eq!(config.status_interval(), None);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_mode_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"carrier-pigeon\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
