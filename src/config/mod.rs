//! Configuration
//!
//! `ProxyProtocolConfig` controls header decoding for a listener.
//! `ServerConfig` is the file/env layout read by the `proxy-echo` binary.

pub mod proxy;

pub use proxy::ProxyProtocolConfig;

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Default bind address for the demo server
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub proxy_protocol: ProxyProtocolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            proxy_protocol: ProxyProtocolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a TOML file, then apply `PROXY_STREAM_*` environment overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `PROXY_STREAM_PROXY_PROTOCOL__TIMEOUT=10`.
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }

    /// Defaults plus environment overrides, no file
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("PROXY_STREAM")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.proxy_protocol, ProxyProtocolConfig::default());
    }

    #[test]
    fn test_from_path() {
        let path = std::env::temp_dir().join(format!(
            "proxy-stream-config-{}.toml",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "listen = \"0.0.0.0:9000\"\n\n[proxy_protocol]\nparse_tlvs = false\ntimeout = 1"
        )
        .unwrap();
        drop(file);

        let config = ServerConfig::from_path(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.listen, "0.0.0.0:9000");
        assert!(!config.proxy_protocol.parse_tlvs);
        assert_eq!(config.proxy_protocol.timeout, 1);
        assert_eq!(config.proxy_protocol.max_header_size, 4096);
    }

    #[test]
    fn test_from_path_missing_file() {
        assert!(ServerConfig::from_path("/nonexistent/proxy-stream.toml").is_err());
    }
}
