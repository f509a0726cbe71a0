//! Ledger Connector
//!
//! Connects a Ledger device running the Ethereum app to a generic Ethereum
//! account abstraction.
//!
//! # Architecture
//!
//! This crate provides:
//! - **device_action**: progress-stream state model and the single-result bridge
//! - **transport**: APDU framing, Speculos and in-process simulator transports
//! - **dmk**: device management kit (discovery, sessions, log fan-out)
//! - **context**: clear-signing metadata loaders
//! - **signer**: Ethereum app device actions
//! - **account**: chain-account adapter over a connection
//! - **connector**: discover, connect, build the signer, read the address
//!
//! # Example
//!
//! ```rust,ignore
//! use ledger_connector::{connect_ledger, to_ledger_account, Account, ConnectorConfig};
//! use ledger_connector::LedgerConnectorParameters;
//!
//! let config = ConnectorConfig::from_env()?;
//! let connection = connect_ledger(&LedgerConnectorParameters::default(), &config).await?;
//! let account = to_ledger_account(&connection);
//! let signature = account.sign_message("hello".into()).await?;
//! connection.disconnect().await?;
//! ```

pub mod account;
pub mod config;
pub mod connector;
pub mod context;
pub mod device_action;
pub mod dmk;
pub mod error;
pub mod eth;
pub mod logging;
pub mod serde_bytes;
pub mod signer;
pub mod transport;

pub use account::{to_ledger_account, Account, LedgerAccount, SignableMessage};
pub use config::{ConnectorConfig, ContextModuleConfig, DEFAULT_DERIVATION_PATH};
pub use connector::{
    connect_ledger, connect_ledger_with, LedgerConnection, LedgerConnectorParameters,
};
pub use device_action::{
    run_device_action_once, try_run_device_action_once, DeviceActionError, DeviceActionState,
    ExecuteDeviceAction,
};
pub use error::{ConnectorError, ConnectorResult, ErrorCode};
pub use eth::Signature;
pub use transport::TransportIdentifier;
