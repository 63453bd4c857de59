//! Configuration loaded from TOML.

use std::time::Duration;

use farhand_protocol::secure::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};

/// Largest clipboard payload one channel frame can carry. The rest of the
/// frame is left for the message encoding around the bytes.
pub const CLIPBOARD_FRAME_LIMIT: usize = MAX_FRAME_SIZE as usize - 64;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub clipboard: ClipboardConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub peer: PeerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            session: SessionConfig::default(),
            clipboard: ClipboardConfig::default(),
            server: ServerConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

/// Timeouts and sizing for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Bound on bringing up the data and clipboard channels.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Bound on one clipboard exchange.
    #[serde(default = "default_clipboard_timeout_ms")]
    pub clipboard_timeout_ms: u64,
    /// How long workers get to finish before they are aborted.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn clipboard_timeout(&self) -> Duration {
        Duration::from_millis(self.clipboard_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            clipboard_timeout_ms: default_clipboard_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Clipboard sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_clipboard_size")]
    pub max_size: usize,
}

impl ClipboardConfig {
    /// The size limit actually applied to content in either direction.
    pub fn size_limit(&self) -> usize {
        self.max_size.min(CLIPBOARD_FRAME_LIMIT)
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_max_clipboard_size(),
        }
    }
}

/// Where `farhand listen` accepts clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Default remote for `farhand connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_port(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_startup_timeout_ms() -> u64 {
    10_000
}

fn default_clipboard_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

fn default_max_clipboard_size() -> usize {
    CLIPBOARD_FRAME_LIMIT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    24900
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("port = 24900"));
        assert!(toml_str.contains("queue_capacity = 4096"));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.session.shutdown_grace(), Duration::from_secs(2));
        assert!(config.clipboard.enabled);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert!(config.peer.address.is_none());
        assert_eq!(config.clipboard.size_limit(), CLIPBOARD_FRAME_LIMIT);
    }

    #[test]
    fn clipboard_limit_never_exceeds_a_frame() {
        let mut clipboard = ClipboardConfig {
            enabled: true,
            max_size: 10 * 1024 * 1024,
        };
        assert_eq!(clipboard.size_limit(), CLIPBOARD_FRAME_LIMIT);
        clipboard.max_size = 4096;
        assert_eq!(clipboard.size_limit(), 4096);
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
log_level = "debug"

[session]
connect_timeout_ms = 1500
queue_capacity = 16

[clipboard]
enabled = false
max_size = 1024

[server]
bind = "127.0.0.1"
port = 25000

[peer]
address = "192.168.1.42"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.session.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.session.handshake_timeout_ms, 10_000);
        assert_eq!(config.session.queue_capacity, 16);
        assert!(!config.clipboard.enabled);
        assert_eq!(config.clipboard.max_size, 1024);
        assert_eq!(config.server.port, 25000);
        assert_eq!(config.peer.address.as_deref(), Some("192.168.1.42"));
        assert_eq!(config.peer.port, 24900);
    }
}
