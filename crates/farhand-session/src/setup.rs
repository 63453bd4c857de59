//! Config loading and default paths.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{Config, CLIPBOARD_FRAME_LIMIT};
use crate::error::SessionError;

/// Load configuration from the given path, or the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, SessionError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| SessionError::Config(format!("failed to read config: {e}")))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| SessionError::Config(format!("failed to parse config: {e}")))?;
        if config.clipboard.max_size > CLIPBOARD_FRAME_LIMIT {
            warn!(
                configured = config.clipboard.max_size,
                limit = CLIPBOARD_FRAME_LIMIT,
                "clipboard.max_size exceeds what one frame can carry, clamping"
            );
            config.clipboard.max_size = CLIPBOARD_FRAME_LIMIT;
        }
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!(path = %config_path.display(), "no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("farhand")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "farhand-setup-{}-{name}.toml",
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("farhand-does-not-exist/config.toml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 24900);
    }

    #[test]
    fn reads_given_file() {
        let path = scratch_file("reads", "[server]\nport = 4242\n");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 4242);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn oversized_clipboard_limit_is_clamped() {
        let path = scratch_file("clamp", "[clipboard]\nmax_size = 10485760\n");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.clipboard.max_size, CLIPBOARD_FRAME_LIMIT);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn bad_toml_is_config_error() {
        let path = scratch_file("bad", "[server\nport = ");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn default_path_is_under_farhand() {
        assert!(default_config_path().ends_with("farhand/config.toml"));
    }
}
