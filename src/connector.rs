//! Connection bootstrap
//!
//! Discover the first device on a transport, open a session with the
//! refresher disabled, build the context module and the signer, then read the
//! account address. The free functions wrap signer actions in
//! [`run_device_action_once`] for callers that only want the result.

use std::sync::Arc;

use ethers_core::types::Address;
use futures::StreamExt;

use crate::config::{ConnectorConfig, ContextModuleConfig, DEFAULT_DERIVATION_PATH};
use crate::context::{ContextModule, ContextModuleBuilder, DefaultContextModule};
use crate::device_action::{
    run_device_action_once, DeviceActionError, DeviceActionOnce, DeviceActionStream, OnComplete,
    SignerIntermediateValue,
};
use crate::dmk::{
    ConnectArgs, DeviceManagementKit, DeviceManagementKitBuilder, SessionId,
    SessionRefresherOptions,
};
use crate::error::{ConnectorError, ConnectorResult};
use crate::eth::{to_checksum_address, Signature, TypedData};
use crate::logging::{ConsoleLogger, LogEntry, LogsExporterLogger};
use crate::signer::{
    AddressOptions, GetAddressOutput, MessageOptions, MessagePayload, SignerEth,
    SignerEthBuilder, TransactionOptions, TypedDataOptions,
};
use crate::transport::{SimulatorTransport, SpeculosTransport, TransportIdentifier};

/// Future returned by the free signing functions
pub type SignerOnce<O> =
    DeviceActionOnce<DeviceActionStream<O, DeviceActionError, SignerIntermediateValue>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConnectorParameters {
    pub transport: TransportIdentifier,
    /// Falls back to the configured origin token
    pub origin_token: Option<String>,
    /// Falls back to `44'/60'/0'/0/0`
    pub derivation_path: Option<String>,
    pub address_options: AddressOptions,
}

impl LedgerConnectorParameters {
    pub fn new(transport: TransportIdentifier) -> Self {
        Self {
            transport,
            origin_token: None,
            derivation_path: None,
            address_options: AddressOptions::default(),
        }
    }
}

impl Default for LedgerConnectorParameters {
    fn default() -> Self {
        Self::new(TransportIdentifier::Simulator)
    }
}

/// A live session with a signer bound to it
pub struct LedgerConnection {
    pub dmk: Arc<DeviceManagementKit>,
    pub session_id: SessionId,
    pub derivation_path: String,
    pub signer: Arc<SignerEth>,
    pub address: Address,
}

impl LedgerConnection {
    /// EIP-55 form of [`LedgerConnection::address`]
    pub fn checksum_address(&self) -> String {
        to_checksum_address(self.address.as_bytes())
    }

    /// Release the session. In-flight actions are not cancelled; the signer
    /// fails every later action with `SessionNotFound`.
    pub async fn disconnect(self) -> ConnectorResult<()> {
        self.dmk.disconnect(&self.session_id).await
    }
}

/// Speculos and simulator transports, console and exporter loggers
pub fn default_dmk(
    config: &ConnectorConfig,
) -> ConnectorResult<(DeviceManagementKit, Arc<LogsExporterLogger>)> {
    let exporter = Arc::new(LogsExporterLogger::new());
    let dmk = DeviceManagementKitBuilder::new()
        .add_transport(Arc::new(SpeculosTransport::new(config.speculos_url.as_str())?))
        .add_transport(Arc::new(SimulatorTransport::new(&config.simulator_mnemonic)?))
        .add_logger(Arc::new(ConsoleLogger))
        .add_logger(exporter.clone())
        .build();
    Ok((dmk, exporter))
}

pub async fn connect_ledger(
    params: &LedgerConnectorParameters,
    config: &ConnectorConfig,
) -> ConnectorResult<LedgerConnection> {
    let (dmk, _) = default_dmk(config)?;
    connect_ledger_with(Arc::new(dmk), params, config).await
}

pub async fn connect_ledger_with(
    dmk: Arc<DeviceManagementKit>,
    params: &LedgerConnectorParameters,
    config: &ConnectorConfig,
) -> ConnectorResult<LedgerConnection> {
    // first device wins, no picker
    let device = dmk
        .start_discovering(params.transport)?
        .next()
        .await
        .ok_or_else(|| {
            ConnectorError::discovery_failed(format!("No device found on {}", params.transport))
        })?;

    let session_id = dmk
        .connect(ConnectArgs {
            device,
            session_refresher_options: SessionRefresherOptions::disabled(),
        })
        .await?;

    let origin_token = params
        .origin_token
        .clone()
        .unwrap_or_else(|| config.context.origin_token.clone());
    let context_module = ledger_context_module(&ContextModuleConfig {
        origin_token: origin_token.clone(),
        ..config.context.clone()
    })?;
    let signer = Arc::new(ledger_signer_eth(
        Arc::clone(&dmk),
        session_id.clone(),
        origin_token,
        Arc::new(context_module),
    )?);

    let derivation_path = params
        .derivation_path
        .clone()
        .unwrap_or_else(|| DEFAULT_DERIVATION_PATH.to_string());

    let output = match get_address(&signer, &derivation_path, params.address_options, None).await
    {
        Ok(output) => output,
        Err(e) => {
            dmk.log(
                LogEntry::warn("connector", "address request failed, releasing session")
                    .field("session", &session_id)
                    .field("error", &e),
            );
            if let Err(release) = dmk.disconnect(&session_id).await {
                tracing::warn!(error = %release, "failed to release session");
            }
            return Err(e.into());
        }
    };

    let address: Address = output
        .address
        .parse()
        .map_err(|e| ConnectorError::internal(format!("Device returned a bad address: {}", e)))?;

    dmk.log(
        LogEntry::info("connector", "ledger connected")
            .field("session", &session_id)
            .field("address", &output.address)
            .field("path", &derivation_path),
    );

    Ok(LedgerConnection {
        dmk,
        session_id,
        derivation_path,
        signer,
        address,
    })
}

pub fn ledger_context_module(config: &ContextModuleConfig) -> ConnectorResult<DefaultContextModule> {
    ContextModuleBuilder::from_config(config.clone()).build()
}

pub fn ledger_signer_eth(
    dmk: Arc<DeviceManagementKit>,
    session_id: SessionId,
    origin_token: impl Into<String>,
    context_module: Arc<dyn ContextModule>,
) -> ConnectorResult<SignerEth> {
    SignerEthBuilder::new(dmk, session_id, origin_token)
        .with_context_module(context_module)
        .build()
}

pub fn get_address(
    signer: &SignerEth,
    derivation_path: &str,
    options: AddressOptions,
    on_complete: Option<OnComplete>,
) -> SignerOnce<GetAddressOutput> {
    run_device_action_once(|| signer.get_address(derivation_path, options), on_complete)
}

pub fn sign_message(
    signer: &SignerEth,
    derivation_path: &str,
    message: impl Into<MessagePayload>,
    on_complete: Option<OnComplete>,
) -> SignerOnce<Signature> {
    run_device_action_once(
        || signer.sign_message(derivation_path, message, MessageOptions::default()),
        on_complete,
    )
}

/// `transaction` is the unsigned serialized transaction
pub fn sign_transaction(
    signer: &SignerEth,
    derivation_path: &str,
    transaction: &[u8],
    on_complete: Option<OnComplete>,
) -> SignerOnce<Signature> {
    run_device_action_once(
        || signer.sign_transaction(derivation_path, transaction, TransactionOptions::default()),
        on_complete,
    )
}

pub fn sign_typed_data(
    signer: &SignerEth,
    derivation_path: &str,
    typed_data: &TypedData,
    on_complete: Option<OnComplete>,
) -> SignerOnce<Signature> {
    run_device_action_once(
        || signer.sign_typed_data(derivation_path, typed_data, TypedDataOptions::default()),
        on_complete,
    )
}
