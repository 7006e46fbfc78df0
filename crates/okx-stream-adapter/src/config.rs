/*
[INPUT]:  YAML configuration file or programmatic overrides
[OUTPUT]: Validated stream client configuration
[POS]:    Configuration layer - connection, timing and dispatch settings
[UPDATE]: When adding new configuration options
*/

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Credentials;
use crate::book::DEFAULT_CHECKSUM_DEPTH;
use crate::error::{OkxError, Result};
use crate::types::Endpoint;
use crate::ws::dispatch::DispatchMode;

const LIVE_HOST: &str = "wss://ws.okx.com:8443";
const DEMO_HOST: &str = "wss://wspap.okx.com:8443";

/// Stream client configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Which endpoint to dial
    pub endpoint: Endpoint,
    /// Full URL override, e.g. a local test peer or proxy
    pub url: Option<String>,
    /// Dial the demo-trading host instead of live
    pub demo_trading: bool,
    pub connect_timeout_ms: u64,
    /// Deadline for login and correlated requests
    pub request_timeout_ms: u64,
    /// Idle time before a keepalive ping; twice this declares the link dead
    pub ping_interval_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Levels per side covered by the book checksum for diff channels
    pub checksum_depth: usize,
    pub dispatch: DispatchMode,
    /// Re-request a fresh snapshot after a book integrity failure
    pub resubscribe_on_integrity_error: bool,
    /// Descriptors per subscribe frame when replaying
    pub subscribe_batch_size: usize,
    /// API credentials; login is attempted only on non-public endpoints
    pub credentials: Option<ApiKeyConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Public,
            url: None,
            demo_trading: false,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            ping_interval_ms: 25_000,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            checksum_depth: DEFAULT_CHECKSUM_DEPTH,
            dispatch: DispatchMode::Inline,
            resubscribe_on_integrity_error: true,
            subscribe_batch_size: 20,
            credentials: None,
        }
    }
}

impl StreamConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// URL the client dials
    pub fn ws_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let host = if self.demo_trading { DEMO_HOST } else { LIVE_HOST };
        format!("{host}{}", self.endpoint.path())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.ws_url())
            .map_err(|err| OkxError::Config(format!("invalid url {}: {err}", self.ws_url())))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(OkxError::Config(format!(
                "url scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(OkxError::Config("timeouts must be non-zero".to_string()));
        }
        if self.ping_interval_ms == 0 {
            return Err(OkxError::Config("ping_interval_ms must be non-zero".to_string()));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(OkxError::Config(
                "backoff_max_ms must be >= backoff_initial_ms > 0".to_string(),
            ));
        }
        if self.checksum_depth == 0 {
            return Err(OkxError::Config("checksum_depth must be non-zero".to_string()));
        }
        if self.subscribe_batch_size == 0 {
            return Err(OkxError::Config("subscribe_batch_size must be non-zero".to_string()));
        }
        if let DispatchMode::Queued { capacity: 0, .. } = self.dispatch {
            return Err(OkxError::Config("dispatch capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// API key triple as it appears in a config file
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl ApiKeyConfig {
    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(&self.api_key, &self.secret_key, &self.passphrase)
    }
}

impl std::fmt::Debug for ApiKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyConfig")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::dispatch::OverflowPolicy;
    use rstest::rstest;

    #[test]
    fn test_default_urls() {
        assert_eq!(StreamConfig::default().ws_url(), "wss://ws.okx.com:8443/ws/v5/public");

        let mut config = StreamConfig::new(Endpoint::Business);
        config.demo_trading = true;
        assert_eq!(config.ws_url(), "wss://wspap.okx.com:8443/ws/v5/business");

        config.url = Some("ws://127.0.0.1:9000".to_string());
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial_overrides() {
        let yaml = r#"
endpoint: private
ping_interval_ms: 15000
dispatch:
  mode: queued
  capacity: 256
  overflow: block
credentials:
  api_key: key
  secret_key: secret
  passphrase: pass
"#;
        let config = StreamConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.endpoint, Endpoint::Private);
        assert_eq!(config.ping_interval(), Duration::from_secs(15));
        assert_eq!(config.checksum_depth, DEFAULT_CHECKSUM_DEPTH);
        assert_eq!(
            config.dispatch,
            DispatchMode::Queued {
                capacity: 256,
                overflow: OverflowPolicy::Block
            }
        );
        let credentials = config.credentials.as_ref().unwrap().to_credentials();
        assert_eq!(credentials.api_key, "key");
    }

    #[rstest]
    #[case::bad_scheme("url: https://ws.okx.com")]
    #[case::zero_depth("checksum_depth: 0")]
    #[case::inverted_backoff("backoff_initial_ms: 5000\nbackoff_max_ms: 100")]
    #[case::zero_batch("subscribe_batch_size: 0")]
    #[case::zero_capacity("dispatch: {mode: queued, capacity: 0, overflow: block}")]
    fn test_invalid_config_rejected(#[case] yaml: &str) {
        assert!(matches!(StreamConfig::from_yaml_str(yaml), Err(OkxError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = StreamConfig::from_yaml_file("/nonexistent/okx-stream.yaml").unwrap_err();
        assert!(matches!(err, OkxError::Io(_)));
    }
}
