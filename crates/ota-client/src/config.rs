//! Client configuration.
//!
//! ```toml
//! endpoint = "ota.update/.UpdateService"
//! reply_to = "ota-client"
//! service_url = "ws://127.0.0.1:8700"
//!
//! [preferences]
//! channel = "live"
//! wifi_only = false
//! ```

use crate::error::ConfigError;
use ota_core::{Channel, ReplyTo, ServiceEndpoint};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Service the client binds to.
    pub endpoint: ServiceEndpoint,
    /// Name replies are addressed to.
    pub reply_to: String,
    /// WebSocket URL, when the service is reached over the network.
    pub service_url: Option<String>,
    pub preferences: Preferences,
}

/// Initial session preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preferences {
    pub channel: Channel,
    pub wifi_only: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: ServiceEndpoint::default(),
            reply_to: "ota-client".to_string(),
            service_url: None,
            preferences: Preferences::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn reply_to(&self) -> ReplyTo {
        ReplyTo::new(self.reply_to.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.preferences.channel, Channel::Live);
    }

    #[test]
    fn full_config() {
        let config = ClientConfig::from_toml_str(
            r#"
            endpoint = "vendor.ota/vendor.ota.Service"
            reply_to = "kiosk"
            service_url = "ws://10.0.0.2:8700"

            [preferences]
            channel = "dev"
            wifi_only = true
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint.package(), "vendor.ota");
        assert_eq!(config.reply_to(), ReplyTo::new("kiosk"));
        assert_eq!(config.service_url.as_deref(), Some("ws://10.0.0.2:8700"));
        assert_eq!(config.preferences.channel, Channel::Dev);
        assert!(config.preferences.wifi_only);
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let err = ClientConfig::from_toml_str(r#"endpoint = "nope""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
