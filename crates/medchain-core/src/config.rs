//! Workspace configuration
//!
//! Loaded from TOML by the composition root. Every section has defaults, so
//! an empty file is a valid configuration.
//!
//! ```toml
//! [wallet]
//! init_throttle_ms = 1000
//! expected_chain_id = 11155111
//!
//! [ledger]
//! cost_margin_percent = 20
//!
//! [store]
//! gateway_url = "https://gateway.pinata.cloud/ipfs"
//!
//! [session]
//! state_file = ".medchain/session.json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default throttle window for wallet initialization.
pub const DEFAULT_INIT_THROTTLE_MS: u64 = 1000;

/// Default safety margin added to ledger cost estimates.
pub const DEFAULT_COST_MARGIN_PERCENT: u64 = 20;

/// Upper bound accepted for the cost margin.
pub const COST_MARGIN_PERCENT_MAX: u64 = 500;

/// Configuration loading or validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// I/O message
        message: String,
    },
    /// File is not valid TOML for this schema
    #[error("Invalid config: {message}")]
    Parse {
        /// Parser message
        message: String,
    },
    /// A value is out of range
    #[error("Invalid configuration: {field} - {reason}")]
    Invalid {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Wallet session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Minimum spacing between provider handshakes
    pub init_throttle_ms: u64,
    /// Chain every ledger write must be signed on, if pinned
    pub expected_chain_id: Option<u64>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            init_throttle_ms: DEFAULT_INIT_THROTTLE_MS,
            expected_chain_id: None,
        }
    }
}

/// Ledger gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Percentage added on top of each cost estimate
    pub cost_margin_percent: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cost_margin_percent: DEFAULT_COST_MARGIN_PERCENT,
        }
    }
}

/// Content store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL used to build retrieval links
    pub gateway_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://gateway.pinata.cloud/ipfs".to_string(),
        }
    }
}

/// Client-persisted session settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// File holding the persisted session; in-memory when unset
    pub state_file: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedchainConfig {
    /// Wallet session settings
    pub wallet: WalletConfig,
    /// Ledger gateway settings
    pub ledger: LedgerConfig,
    /// Content store settings
    pub store: StoreConfig,
    /// Session persistence settings
    pub session: SessionConfig,
}

impl MedchainConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.cost_margin_percent > COST_MARGIN_PERCENT_MAX {
            return Err(ConfigError::invalid(
                "ledger.cost_margin_percent",
                format!("must be at most {COST_MARGIN_PERCENT_MAX}"),
            ));
        }
        let url = self.store.gateway_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::invalid(
                "store.gateway_url",
                "must be an http(s) URL",
            ));
        }
        if self.wallet.expected_chain_id == Some(0) {
            return Err(ConfigError::invalid(
                "wallet.expected_chain_id",
                "chain id 0 is not a valid chain",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = MedchainConfig::from_toml_str("").unwrap();
        assert_eq!(config, MedchainConfig::default());
        assert_eq!(config.wallet.init_throttle_ms, 1000);
        assert_eq!(config.ledger.cost_margin_percent, 20);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = MedchainConfig::from_toml_str(
            r#"
            [wallet]
            expected_chain_id = 11155111

            [store]
            gateway_url = "http://localhost:8080/ipfs"
            "#,
        )
        .unwrap();
        assert_eq!(config.wallet.expected_chain_id, Some(11155111));
        assert_eq!(config.wallet.init_throttle_ms, DEFAULT_INIT_THROTTLE_MS);
        assert_eq!(config.store.gateway_url, "http://localhost:8080/ipfs");
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let err = MedchainConfig::from_toml_str("[ledger]\ncost_margin_percent = 900").unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid { ref field, .. } if field == "ledger.cost_margin_percent"
        );

        let err = MedchainConfig::from_toml_str("[store]\ngateway_url = \"ftp://x\"").unwrap_err();
        assert_matches!(err, ConfigError::Invalid { .. });

        let err =
            MedchainConfig::from_toml_str("[wallet]\ninit_throttle_ms = \"soon\"").unwrap_err();
        assert_matches!(err, ConfigError::Parse { .. });
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nstate_file = \"/tmp/medchain-session.json\"").unwrap();
        let config = MedchainConfig::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.session.state_file,
            Some(PathBuf::from("/tmp/medchain-session.json"))
        );

        let missing = MedchainConfig::load_from_file(Path::new("/nonexistent/medchain.toml"));
        assert_matches!(missing, Err(ConfigError::Io { .. }));
    }
}
