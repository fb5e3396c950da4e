//! Server configuration.
//!
//! [`ServerConfig`] is the single source of truth for runtime settings.  It
//! can be built from defaults, read from a TOML file, and then overridden by
//! CLI flags in `main.rs`.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! ws_path = "/ws"
//! max_frame_bytes = 1048576
//! max_upload_bytes = 67108864
//! report_errors = false
//! debug = false
//! ```
//!
//! Every field has a default, so a partial file (or an empty one) is valid.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// All runtime configuration for the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// HTTP path the WebSocket upgrade must target.  Empty accepts any path.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Largest inbound frame accepted outside an upload.  Larger frames are
    /// dropped without closing the connection.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Largest payload one chunked upload may reassemble.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// When `true`, frames that fail to parse, resolve or decode are answered
    /// with a `Rattle.Error` frame.  When `false` (the default) they are
    /// dropped silently.
    #[serde(default)]
    pub report_errors: bool,

    /// Raises the default log level to `debug` so dropped frames are visible.
    #[serde(default)]
    pub debug: bool,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    /// | Field            | Default          |
    /// |------------------|------------------|
    /// | bind_addr        | `127.0.0.1:8080` |
    /// | ws_path          | `/ws`            |
    /// | max_frame_bytes  | 1 MiB            |
    /// | max_upload_bytes | 64 MiB           |
    /// | report_errors    | `false`          |
    /// | debug            | `false`          |
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ws_path: default_ws_path(),
            max_frame_bytes: default_max_frame_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            report_errors: false,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for zero-sized limits.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// errors of [`ServerConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks the limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if either limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be greater than 0".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be greater than 0".to_string()));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_addr_is_loopback_8080() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_default_errors_are_silent() {
        // Silent drop is the compatible behaviour for existing clients.
        let cfg = ServerConfig::default();
        assert!(!cfg.report_errors);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        // Arrange
        let text = r#"
            bind_addr = "0.0.0.0:9000"
            report_errors = true
        "#;

        // Act
        let cfg = ServerConfig::from_toml_str(text).unwrap();

        // Assert
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert!(cfg.report_errors);
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.max_upload_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = ServerConfig::from_toml_str("bind_addr = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_socket_addr_is_parse_error() {
        let result = ServerConfig::from_toml_str(r#"bind_addr = "not an address""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_frame_limit_is_invalid() {
        let result = ServerConfig::from_toml_str("max_frame_bytes = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = ServerConfig::load(Path::new("/definitely/not/here/rattle.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_config_survives_toml_round_trip() {
        let cfg = ServerConfig {
            debug: true,
            ws_path: String::new(),
            ..ServerConfig::default()
        };
        let text = toml::to_string(&cfg).unwrap();
        assert_eq!(ServerConfig::from_toml_str(&text).unwrap(), cfg);
    }
}
