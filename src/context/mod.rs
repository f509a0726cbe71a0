//! Clear-signing context module
//!
//! Before a transaction is signed, the signer asks the context module for
//! metadata the device can display (token tickers and decimals). Each loader
//! inspects the transaction and may fetch signed descriptors from a remote
//! service. A failing loader is logged and skipped; signing never depends on
//! context being available.

pub mod cal;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::{CalConfig, ContextModuleConfig, ServiceConfig};
use crate::error::{ConnectorError, ConnectorResult};
use crate::eth::TransactionContext;

pub use cal::CalTokenLoader;

/// Metadata the device accepts ahead of a signing request
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClearSignContext {
    /// Signed ERC-20 descriptor for PROVIDE ERC-20 TOKEN INFORMATION
    Token { payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Service answered HTTP {0}")]
    Http(u16),

    #[error("No descriptor found for {0}")]
    NotFound(String),

    #[error("Invalid descriptor: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for ContextError {
    fn from(e: reqwest::Error) -> Self {
        ContextError::Network(e.to_string())
    }
}

/// Source of clear-signing contexts for one kind of transaction
pub trait ContextLoader: Send + Sync {
    fn name(&self) -> &'static str;

    fn load<'a>(
        &'a self,
        transaction: &'a TransactionContext,
    ) -> BoxFuture<'a, Result<Vec<ClearSignContext>, ContextError>>;
}

/// Aggregates loaders for the signer
pub trait ContextModule: Send + Sync {
    fn get_contexts<'a>(
        &'a self,
        transaction: &'a TransactionContext,
    ) -> BoxFuture<'a, Vec<ClearSignContext>>;
}

pub struct DefaultContextModule {
    config: ContextModuleConfig,
    loaders: Vec<Arc<dyn ContextLoader>>,
}

impl DefaultContextModule {
    pub fn config(&self) -> &ContextModuleConfig {
        &self.config
    }

    pub fn loader_names(&self) -> Vec<&'static str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }
}

impl ContextModule for DefaultContextModule {
    fn get_contexts<'a>(
        &'a self,
        transaction: &'a TransactionContext,
    ) -> BoxFuture<'a, Vec<ClearSignContext>> {
        Box::pin(async move {
            let mut contexts = Vec::new();
            for loader in &self.loaders {
                match loader.load(transaction).await {
                    Ok(found) => {
                        tracing::debug!(loader = loader.name(), count = found.len(), "contexts loaded");
                        contexts.extend(found);
                    }
                    Err(e) => {
                        tracing::warn!(loader = loader.name(), error = %e, "context loader failed");
                    }
                }
            }
            contexts
        })
    }
}

pub struct ContextModuleBuilder {
    config: ContextModuleConfig,
    custom_loaders: Vec<Arc<dyn ContextLoader>>,
}

impl ContextModuleBuilder {
    pub fn new(origin_token: impl Into<String>) -> Self {
        Self {
            config: ContextModuleConfig {
                origin_token: origin_token.into(),
                ..ContextModuleConfig::default()
            },
            custom_loaders: Vec::new(),
        }
    }

    pub fn from_config(config: ContextModuleConfig) -> Self {
        Self {
            config,
            custom_loaders: Vec::new(),
        }
    }

    pub fn set_cal_config(mut self, cal: CalConfig) -> Self {
        self.config.cal = cal;
        self
    }

    pub fn set_web3_checks_config(mut self, web3checks: ServiceConfig) -> Self {
        self.config.web3checks = web3checks;
        self
    }

    pub fn set_metadata_service_config(mut self, metadata_service: ServiceConfig) -> Self {
        self.config.metadata_service = metadata_service;
        self
    }

    pub fn set_default_loaders(mut self, enabled: bool) -> Self {
        self.config.default_loaders = enabled;
        self
    }

    pub fn set_default_field_loaders(mut self, enabled: bool) -> Self {
        self.config.default_field_loaders = enabled;
        self
    }

    pub fn add_loader(mut self, loader: Arc<dyn ContextLoader>) -> Self {
        self.custom_loaders.push(loader);
        self
    }

    pub fn build(self) -> ConnectorResult<DefaultContextModule> {
        for (name, endpoint) in [
            ("cal", &self.config.cal.url),
            ("web3checks", &self.config.web3checks.url),
            ("metadata_service", &self.config.metadata_service.url),
        ] {
            url::Url::parse(endpoint)
                .map_err(|e| ConnectorError::from(e).with_details(name.to_string()))?;
        }

        let mut loaders = Vec::new();
        if self.config.default_loaders {
            let token_loader: Arc<dyn ContextLoader> = Arc::new(CalTokenLoader::new(
                self.config.cal.clone(),
                self.config.origin_token.clone(),
            )?);
            loaders.push(token_loader);
        }
        if self.config.default_field_loaders {
            // typed-data field descriptors are not consumed by this signer
            tracing::debug!("no field loaders available, flag ignored");
        }
        loaders.extend(self.custom_loaders);

        Ok(DefaultContextModule {
            config: self.config,
            loaders,
        })
    }
}
