//! Gateway tuning.

use std::path::Path;
use std::time::Duration;

use nodegate_common::{Error, Result};
use nodegate_crypto::{AlgorithmSuite, CipherKind};
use serde::{Deserialize, Serialize};

/// Gateway configuration.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use nodegate_gateway::GatewayConfig;
///
/// let config = GatewayConfig::from_json_str(r#"{ "cipher": "null" }"#).unwrap();
/// assert_eq!(config.max_clock_skew_secs, 300);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Largest accepted distance between a peer's INITIAL timestamp and the
    /// local clock.
    pub max_clock_skew_secs: u64,
    /// How long a crypto error stands before the session resets itself.
    pub crypto_error_timeout_ms: u64,
    /// Stream cipher both sides must agree on.
    pub cipher: CipherKind,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_secs: 300,
            crypto_error_timeout_ms: 10_000,
            cipher: CipherKind::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_clock_skew_secs == 0 {
            return Err(Error::config("max_clock_skew_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_secs)
    }

    pub fn crypto_error_timeout(&self) -> Duration {
        Duration::from_millis(self.crypto_error_timeout_ms)
    }

    /// Algorithms selected by this configuration.
    pub fn suite(&self) -> AlgorithmSuite {
        AlgorithmSuite::new(self.cipher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_clock_skew(), Duration::from_secs(300));
        assert_eq!(config.crypto_error_timeout(), Duration::from_secs(10));
        assert_eq!(config.cipher, CipherKind::Rc4);
        assert_eq!(config.suite().cipher(), CipherKind::Rc4);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            GatewayConfig::from_json_str(r#"{ "crypto_error_timeout_ms": 0, "cipher": "null" }"#)
                .unwrap();
        assert_eq!(config.crypto_error_timeout_ms, 0);
        assert_eq!(config.cipher, CipherKind::Null);
        assert_eq!(config.max_clock_skew_secs, 300);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            GatewayConfig::from_json_str("{ not json"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            GatewayConfig::from_json_str(r#"{ "cipher": "aes" }"#),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            GatewayConfig::from_json_str(r#"{ "max_clock_skew_secs": 0 }"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("nodegate-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "max_clock_skew_secs": 30 }"#).unwrap();
        let config = GatewayConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.max_clock_skew_secs, 30);

        assert!(matches!(
            GatewayConfig::load(path.with_extension("missing")),
            Err(Error::Io(_))
        ));
    }
}
