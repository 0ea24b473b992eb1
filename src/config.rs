//! Configuration Module
//!
//! Centralized configuration for the PIV client: reader selection policy,
//! APDU framing mode, PIN/PUK retry floors, and ECDH box defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reader selection and transaction policy
    pub reader: ReaderConfig,

    /// APDU framing policy
    pub apdu: ApduConfig,

    /// PIN/PUK retry floor policy
    pub retry: RetryConfig,

    /// Defaults used when sealing a new ECDH box
    pub box_defaults: BoxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            apdu: ApduConfig::default(),
            retry: RetryConfig::default(),
            box_defaults: BoxConfig::default(),
        }
    }
}

/// Reader selection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Require the reader name to contain this substring; empty means "any
    /// reader".
    pub name_filter: String,

    /// Fail enumeration of a reader on a hard PC/SC error rather than
    /// skipping it and returning a token descriptor with cleared
    /// capability flags.
    pub strict_enumeration: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            name_filter: String::new(),
            strict_enumeration: false,
        }
    }
}

/// APDU framing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApduConfig {
    /// Use extended-length Lc/Le framing instead of command chaining when
    /// the card advertises support.
    pub prefer_extended_length: bool,

    /// Force short-APDU chaining even when extended length is available
    /// (useful for readers with broken extended-length support).
    pub force_short_apdu: bool,
}

impl Default for ApduConfig {
    fn default() -> Self {
        Self {
            prefer_extended_length: true,
            force_short_apdu: false,
        }
    }
}

/// PIN/PUK retry floor policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Refuse `verify_pin` if the card's current retry counter is below
    /// this value, returning `MinRetries` instead of attempting the PIN.
    pub min_pin_retries: Option<u8>,

    /// Same floor, applied to PUK-based operations.
    pub min_puk_retries: Option<u8>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_pin_retries: None,
            min_puk_retries: None,
        }
    }
}

/// Defaults applied when sealing a new ECDH box, absent an explicit
/// override at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxConfig {
    /// Envelope format version written on seal (1–3; see box module docs).
    pub version: u8,

    /// AEAD cipher name, e.g. `"chacha20-poly1305"` or `"aes256-gcm"`.
    pub cipher: String,

    /// KDF name, e.g. `"sha512"`.
    pub kdf: String,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            version: 3,
            cipher: "chacha20-poly1305".to_string(),
            kdf: "sha512".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(min) = self.retry.min_pin_retries {
            if min == 0 {
                return Err(ConfigError::InvalidConfig(
                    "min_pin_retries of 0 disables the floor; use None instead".to_string(),
                ));
            }
        }

        if self.apdu.prefer_extended_length && self.apdu.force_short_apdu {
            return Err(ConfigError::InvalidConfig(
                "prefer_extended_length and force_short_apdu are mutually exclusive".to_string(),
            ));
        }

        match self.box_defaults.cipher.as_str() {
            "chacha20-poly1305" | "aes256-gcm" | "aes256-ctr" => {}
            other => {
                return Err(ConfigError::InvalidConfig(format!("unknown cipher name: {other}")));
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example(path: &PathBuf) -> Result<(), ConfigError> {
        let example = Config {
            reader: ReaderConfig {
                name_filter: "Yubico".to_string(),
                strict_enumeration: false,
            },
            apdu: ApduConfig::default(),
            retry: RetryConfig {
                min_pin_retries: Some(1),
                min_puk_retries: Some(1),
            },
            box_defaults: BoxConfig::default(),
        };

        example.save(path)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.apdu.prefer_extended_length);
        assert_eq!(config.box_defaults.version, 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.apdu.force_short_apdu = true;
        assert!(config.validate().is_err());

        config.apdu.prefer_extended_length = false;
        assert!(config.validate().is_ok());

        config.box_defaults.cipher = "rot13".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("cipher"));
        assert!(toml_str.contains("min_pin_retries"));
    }
}
