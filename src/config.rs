//! Connector configuration
//!
//! Everything the connector needs is passed in explicitly. The environment
//! is only consulted by [`ConnectorConfig::from_env`].

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConnectorError, ConnectorResult};

/// Standard Ethereum account path used when the caller does not provide one
pub const DEFAULT_DERIVATION_PATH: &str = "44'/60'/0'/0/0";

/// Origin token used when no gating token is configured
pub const DEFAULT_ORIGIN_TOKEN: &str = "origin-token";

pub const DEFAULT_CAL_URL: &str = "https://crypto-assets-service.api.ledger.com/v1";
pub const DEFAULT_WEB3_CHECKS_URL: &str = "https://web3checks-backend.api.ledger.com/v3";
pub const DEFAULT_METADATA_SERVICE_URL: &str = "https://nft.api.live.ledger.com";
pub const DEFAULT_SPECULOS_URL: &str = "http://127.0.0.1:5000";

/// Standard development mnemonic backing the simulator
pub const DEFAULT_SIMULATOR_MNEMONIC: &str =
    "test test test test test test test test test test test junk";

/// Signature set the crypto-assets list serves descriptors for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalMode {
    Prod,
    Test,
}

impl CalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalMode::Prod => "prod",
            CalMode::Test => "test",
        }
    }
}

impl std::str::FromStr for CalMode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prod" => Ok(CalMode::Prod),
            "test" => Ok(CalMode::Test),
            other => Err(ConnectorError::invalid_config(format!(
                "Unknown CAL mode: {}",
                other
            ))),
        }
    }
}

/// Crypto-assets list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalConfig {
    pub url: String,
    pub mode: CalMode,
    pub branch: String,
}

impl Default for CalConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAL_URL.to_string(),
            mode: CalMode::Prod,
            branch: "main".to_string(),
        }
    }
}

/// Single-URL service endpoint (web3checks, metadata service)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Clear-signing metadata configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextModuleConfig {
    pub cal: CalConfig,
    pub web3checks: ServiceConfig,
    pub metadata_service: ServiceConfig,
    pub origin_token: String,
    pub default_loaders: bool,
    pub default_field_loaders: bool,
}

impl Default for ContextModuleConfig {
    fn default() -> Self {
        Self {
            cal: CalConfig::default(),
            web3checks: ServiceConfig::new(DEFAULT_WEB3_CHECKS_URL),
            metadata_service: ServiceConfig::new(DEFAULT_METADATA_SERVICE_URL),
            origin_token: DEFAULT_ORIGIN_TOKEN.to_string(),
            default_loaders: false,
            default_field_loaders: false,
        }
    }
}

/// Top-level configuration for [`crate::connector::connect_ledger`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    pub context: ContextModuleConfig,
    pub speculos_url: String,
    pub simulator_mnemonic: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            context: ContextModuleConfig::default(),
            speculos_url: DEFAULT_SPECULOS_URL.to_string(),
            simulator_mnemonic: DEFAULT_SIMULATOR_MNEMONIC.to_string(),
        }
    }
}

impl ConnectorConfig {
    /// Defaults overridden by `LEDGER_GATING_TOKEN`, `LEDGER_SPECULOS_URL`,
    /// `LEDGER_CAL_URL` and `LEDGER_CAL_MODE`
    pub fn from_env() -> ConnectorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConnectorResult<Self> {
        let mut config = Self::default();

        if let Some(token) = lookup("LEDGER_GATING_TOKEN").filter(|t| !t.is_empty()) {
            config.context.origin_token = token;
        }
        if let Some(url) = lookup("LEDGER_SPECULOS_URL") {
            config.speculos_url = url;
        }
        if let Some(url) = lookup("LEDGER_CAL_URL") {
            config.context.cal.url = url;
        }
        if let Some(mode) = lookup("LEDGER_CAL_MODE") {
            config.context.cal.mode = mode.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Every endpoint must parse as an absolute http(s) URL
    pub fn validate(&self) -> ConnectorResult<()> {
        let endpoints = [
            ("cal", &self.context.cal.url),
            ("web3checks", &self.context.web3checks.url),
            ("metadata_service", &self.context.metadata_service.url),
            ("speculos", &self.speculos_url),
        ];

        for (name, endpoint) in endpoints {
            let parsed = Url::parse(endpoint)
                .map_err(|e| ConnectorError::from(e).with_details(name.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConnectorError::invalid_config(format!(
                    "Unsupported URL scheme for {}: {}",
                    name,
                    parsed.scheme()
                )));
            }
        }

        if self.context.origin_token.trim().is_empty() {
            return Err(ConnectorError::invalid_config("Origin token is empty"));
        }

        Ok(())
    }
}
