//! PROXY Protocol Configuration
//!
//! Configuration types for HAProxy PROXY protocol v1/v2 decoding.

use serde::Deserialize;
use std::time::Duration;

use crate::proxy::types::PROXY_V2_MIN_LIMIT;

/// PROXY protocol configuration for a listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyProtocolConfig {
    /// Expect a PROXY header on accepted connections.
    /// When false, streams are passed through untouched.
    pub enabled: bool,

    /// Decode PROXY v2 TLVs (ALPN, authority, SSL info, ...).
    pub parse_tlvs: bool,

    /// Timeout for reading the PROXY header in seconds, applied on top of
    /// any deadline set on the stream. 0 disables it.
    /// Default: 0 (no timeout)
    pub timeout: u64,

    /// Largest v2 header accepted, fixed 16-byte part included.
    /// Values below 232 (two Unix addresses) are raised to 232.
    pub max_header_size: usize,
}

impl Default for ProxyProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parse_tlvs: true,
            timeout: 0,
            max_header_size: 4096,
        }
    }
}

impl ProxyProtocolConfig {
    /// Get timeout as Duration, `None` when disabled
    pub fn timeout_duration(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Size limit actually enforced by the header reader
    pub fn effective_max_header_size(&self) -> usize {
        self.max_header_size.max(PROXY_V2_MIN_LIMIT)
    }

    /// Parse a `[proxy_protocol]`-style TOML table body
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ProxyProtocolConfig::default();
        assert!(config.enabled);
        assert!(config.parse_tlvs);
        assert_eq!(config.timeout_duration(), None);
        assert_eq!(config.effective_max_header_size(), 4096);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ProxyProtocolConfig::from_toml_str("timeout = 3\nmax_header_size = 16").unwrap();
        assert_eq!(config.timeout_duration(), Some(Duration::from_secs(3)));
        assert_eq!(config.effective_max_header_size(), 232);
        assert!(config.parse_tlvs);
    }

    #[test]
    fn test_from_toml_rejects_wrong_type() {
        assert!(ProxyProtocolConfig::from_toml_str("enabled = \"yes\"").is_err());
    }
}
