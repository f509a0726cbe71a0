//! Ethereum signer
//!
//! Every operation runs as a device action: a tokio task drives the APDU
//! exchanges and reports progress on a channel. The caller receives the
//! progress stream and a handle that aborts the task.

mod builder;
pub mod eth_app;

pub use builder::SignerEthBuilder;

use std::future::Future;
use std::sync::Arc;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::context::{ClearSignContext, ContextModule};
use crate::device_action::{
    DeviceActionError, DeviceActionState, DeviceActionStream, ExecuteDeviceAction, SignerStep,
    SignerIntermediateValue, UserInteractionRequired,
};
use crate::dmk::{DeviceManagementKit, SessionId};
use crate::error::ErrorCode;
use crate::eth::{inspect_unsigned_transaction, DerivationPath, Signature, TypedData};
use crate::transport::Apdu;

/// State emitted by signer actions
pub type SignerState<O> = DeviceActionState<O, DeviceActionError, SignerIntermediateValue>;

/// Return value of every signer operation
pub type SignerAction<O> =
    ExecuteDeviceAction<DeviceActionStream<O, DeviceActionError, SignerIntermediateValue>>;

/// Result of GET ADDRESS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAddressOutput {
    pub public_key: String,
    /// EIP-55 checksummed, `0x`-prefixed
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_code: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressOptions {
    /// Display the address on the device and wait for confirmation
    pub check_on_device: bool,
    pub return_chain_code: bool,
    pub skip_open_app: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    pub skip_open_app: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub skip_open_app: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypedDataOptions {
    pub skip_open_app: bool,
}

/// Personal message to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// Signed as its UTF-8 bytes, even when it looks like hex
    Text(String),
    /// `0x`-prefixed hex of a raw payload, signed as the decoded bytes
    Hex(String),
    Bytes(Vec<u8>),
}

impl MessagePayload {
    pub fn into_bytes(self) -> Result<Vec<u8>, DeviceActionError> {
        match self {
            MessagePayload::Text(text) => Ok(text.into_bytes()),
            MessagePayload::Hex(encoded) => {
                let digits = encoded.strip_prefix("0x").unwrap_or(&encoded);
                hex::decode(digits)
                    .map_err(|e| DeviceActionError::InvalidInput(format!("message hex: {}", e)))
            }
            MessagePayload::Bytes(bytes) => Ok(bytes),
        }
    }
}

impl From<&str> for MessagePayload {
    fn from(text: &str) -> Self {
        MessagePayload::Text(text.to_string())
    }
}

impl From<String> for MessagePayload {
    fn from(text: String) -> Self {
        MessagePayload::Text(text)
    }
}

impl From<Vec<u8>> for MessagePayload {
    fn from(bytes: Vec<u8>) -> Self {
        MessagePayload::Bytes(bytes)
    }
}

impl From<&[u8]> for MessagePayload {
    fn from(bytes: &[u8]) -> Self {
        MessagePayload::Bytes(bytes.to_vec())
    }
}

/// Signer bound to one device session
pub struct SignerEth {
    dmk: Arc<DeviceManagementKit>,
    session_id: SessionId,
    context_module: Arc<dyn ContextModule>,
}

/// Handle given to a running action
struct ActionContext<O> {
    dmk: Arc<DeviceManagementKit>,
    session_id: SessionId,
    states: UnboundedSender<SignerState<O>>,
}

impl<O> ActionContext<O> {
    fn pending(&self, step: SignerStep, interaction: UserInteractionRequired) {
        let _ = self.states.unbounded_send(DeviceActionState::Pending {
            intermediate: SignerIntermediateValue::new(step, interaction),
        });
    }

    async fn exchange(&self, apdu: Apdu) -> Result<Vec<u8>, DeviceActionError> {
        let response = self
            .dmk
            .send_apdu(&self.session_id, apdu)
            .await
            .map_err(|e| match e.code {
                ErrorCode::SessionNotFound => {
                    DeviceActionError::SessionNotFound(self.session_id.to_string())
                }
                _ => DeviceActionError::Transport(e.to_string()),
            })?;
        eth_app::check_status(response)
    }

    /// Send every APDU in order; the last response carries the result
    async fn exchange_all(&self, apdus: Vec<Apdu>) -> Result<Vec<u8>, DeviceActionError> {
        let mut last = Vec::new();
        for apdu in apdus {
            last = self.exchange(apdu).await?;
        }
        Ok(last)
    }

    async fn open_app(&self, skip: bool) -> Result<(), DeviceActionError> {
        if skip {
            return Ok(());
        }
        self.pending(SignerStep::OpenApp, UserInteractionRequired::None);
        let data = self.exchange(eth_app::get_app_configuration_apdu()).await?;
        let config = eth_app::parse_app_configuration(&data)?;
        tracing::debug!(version = %config.version, "ethereum app ready");
        Ok(())
    }
}

fn parse_path(derivation_path: &str) -> Result<DerivationPath, DeviceActionError> {
    derivation_path
        .parse()
        .map_err(|e| DeviceActionError::InvalidInput(format!("{}: {}", derivation_path, e)))
}

impl SignerEth {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn execute<O, F, Fut>(&self, action: &'static str, run: F) -> SignerAction<O>
    where
        O: Send + 'static,
        F: FnOnce(ActionContext<O>) -> Fut,
        Fut: Future<Output = Result<O, DeviceActionError>> + Send + 'static,
    {
        let (states, observable) = mpsc::unbounded();
        let _ = states.unbounded_send(DeviceActionState::NotStarted);

        let task = run(ActionContext {
            dmk: Arc::clone(&self.dmk),
            session_id: self.session_id.clone(),
            states: states.clone(),
        });

        let handle = tokio::spawn(async move {
            let terminal = match task.await {
                Ok(output) => DeviceActionState::Completed { output },
                Err(error) => {
                    tracing::debug!(action, %error, "device action failed");
                    DeviceActionState::Error { error }
                }
            };
            let _ = states.unbounded_send(terminal);
        });

        ExecuteDeviceAction::new(observable.boxed()).with_cancel(move || handle.abort())
    }

    pub fn get_address(
        &self,
        derivation_path: &str,
        options: AddressOptions,
    ) -> SignerAction<GetAddressOutput> {
        let derivation_path = derivation_path.to_string();
        self.execute("get-address", move |ctx| async move {
            let path = parse_path(&derivation_path)?;
            ctx.open_app(options.skip_open_app).await?;

            let interaction = if options.check_on_device {
                UserInteractionRequired::VerifyAddress
            } else {
                UserInteractionRequired::None
            };
            ctx.pending(SignerStep::GetAddress, interaction);

            let apdu =
                eth_app::get_address_apdu(&path, options.check_on_device, options.return_chain_code)?;
            let data = ctx.exchange(apdu).await?;
            eth_app::parse_address_response(&data, options.return_chain_code)
        })
    }

    pub fn sign_message(
        &self,
        derivation_path: &str,
        message: impl Into<MessagePayload>,
        options: MessageOptions,
    ) -> SignerAction<Signature> {
        let derivation_path = derivation_path.to_string();
        let message = message.into();
        self.execute("sign-message", move |ctx| async move {
            let path = parse_path(&derivation_path)?;
            let message = message.into_bytes()?;
            ctx.open_app(options.skip_open_app).await?;

            ctx.pending(
                SignerStep::SignMessage,
                UserInteractionRequired::SignPersonalMessage,
            );
            let apdus = eth_app::sign_personal_message_apdus(&path, &message)?;
            eth_app::parse_signature(&ctx.exchange_all(apdus).await?)
        })
    }

    /// Sign the unsigned serialized transaction (typed envelope included)
    pub fn sign_transaction(
        &self,
        derivation_path: &str,
        transaction: &[u8],
        options: TransactionOptions,
    ) -> SignerAction<Signature> {
        let derivation_path = derivation_path.to_string();
        let transaction = transaction.to_vec();
        let context_module = Arc::clone(&self.context_module);
        self.execute("sign-transaction", move |ctx| async move {
            let path = parse_path(&derivation_path)?;
            ctx.open_app(options.skip_open_app).await?;

            ctx.pending(SignerStep::BuildContext, UserInteractionRequired::None);
            let contexts = match inspect_unsigned_transaction(&transaction) {
                Ok(tx_context) => context_module.get_contexts(&tx_context).await,
                Err(e) => {
                    tracing::debug!(error = %e, "transaction not inspectable, signing blind");
                    Vec::new()
                }
            };

            if !contexts.is_empty() {
                ctx.pending(SignerStep::ProvideContext, UserInteractionRequired::None);
                for context in &contexts {
                    match context {
                        ClearSignContext::Token { payload } => {
                            let provided = match eth_app::provide_erc20_info_apdu(payload) {
                                Ok(apdu) => ctx.exchange(apdu).await.map(|_| ()),
                                Err(e) => Err(e),
                            };
                            if let Err(e) = provided {
                                tracing::warn!(error = %e, "token descriptor skipped");
                            }
                        }
                    }
                }
            }

            ctx.pending(
                SignerStep::SignTransaction,
                UserInteractionRequired::SignTransaction,
            );
            let apdus = eth_app::sign_transaction_apdus(&path, &transaction)?;
            eth_app::parse_signature(&ctx.exchange_all(apdus).await?)
        })
    }

    pub fn sign_typed_data(
        &self,
        derivation_path: &str,
        typed_data: &TypedData,
        options: TypedDataOptions,
    ) -> SignerAction<Signature> {
        let derivation_path = derivation_path.to_string();
        let typed_data = typed_data.clone();
        self.execute("sign-typed-data", move |ctx| async move {
            let path = parse_path(&derivation_path)?;
            ctx.open_app(options.skip_open_app).await?;

            ctx.pending(SignerStep::BuildContext, UserInteractionRequired::None);
            let to_input = |e: crate::eth::Eip712Error| DeviceActionError::InvalidInput(e.to_string());
            let domain_separator = typed_data.domain_separator().map_err(to_input)?;
            let message_hash = typed_data.message_hash().map_err(to_input)?;

            ctx.pending(SignerStep::SignTypedData, UserInteractionRequired::SignTypedData);
            let apdu = eth_app::sign_eip712_hashed_apdu(&path, &domain_separator, &message_hash)?;
            eth_app::parse_signature(&ctx.exchange(apdu).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_DERIVATION_PATH, DEFAULT_SIMULATOR_MNEMONIC};
    use crate::context::{ContextError, ContextLoader, ContextModuleBuilder};
    use crate::dmk::{ConnectArgs, DeviceManagementKitBuilder, SessionRefresherOptions};
    use crate::eth::{personal_sign_hash, TransactionContext};
    use crate::transport::{SimulatorTransport, TransportIdentifier};
    use ethers_core::types::{Address, Signature as EthersSignature, H256};
    use futures::future::BoxFuture;

    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    struct Setup {
        dmk: Arc<DeviceManagementKit>,
        simulator: SimulatorTransport,
        session_id: SessionId,
    }

    async fn setup() -> Setup {
        let simulator = SimulatorTransport::new(DEFAULT_SIMULATOR_MNEMONIC).unwrap();
        let dmk = Arc::new(
            DeviceManagementKitBuilder::new()
                .add_transport(Arc::new(simulator.clone()))
                .build(),
        );
        let device = dmk
            .start_discovering(TransportIdentifier::Simulator)
            .unwrap()
            .next()
            .await
            .unwrap();
        let session_id = dmk
            .connect(ConnectArgs {
                device,
                session_refresher_options: SessionRefresherOptions::disabled(),
            })
            .await
            .unwrap();
        Setup {
            dmk,
            simulator,
            session_id,
        }
    }

    fn signer(setup: &Setup) -> SignerEth {
        SignerEthBuilder::new(Arc::clone(&setup.dmk), setup.session_id.clone(), "origin-token")
            .build()
            .unwrap()
    }

    async fn collect<O>(action: SignerAction<O>) -> Vec<SignerState<O>> {
        action.observable.collect().await
    }

    fn steps<O>(states: &[SignerState<O>]) -> Vec<SignerStep> {
        states
            .iter()
            .filter_map(|s| match s {
                DeviceActionState::Pending { intermediate } => Some(intermediate.step),
                _ => None,
            })
            .collect()
    }

    fn address() -> Address {
        ADDRESS.parse().unwrap()
    }

    #[test]
    fn test_message_payload_decoding() {
        assert_eq!(MessagePayload::from("0x6869").into_bytes(), Ok(b"0x6869".to_vec()));
        assert_eq!(MessagePayload::from("hello").into_bytes(), Ok(b"hello".to_vec()));
        assert_eq!(
            MessagePayload::Hex("0x6869".to_string()).into_bytes(),
            Ok(b"hi".to_vec())
        );
        assert!(matches!(
            MessagePayload::Hex("0xzz".to_string()).into_bytes(),
            Err(DeviceActionError::InvalidInput(_))
        ));
        assert_eq!(MessagePayload::from(vec![1u8, 2]).into_bytes(), Ok(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_get_address_states() {
        let setup = setup().await;
        let states = collect(signer(&setup).get_address(
            DEFAULT_DERIVATION_PATH,
            AddressOptions {
                check_on_device: true,
                ..AddressOptions::default()
            },
        ))
        .await;

        assert_eq!(states.first(), Some(&DeviceActionState::NotStarted));
        assert_eq!(steps(&states), vec![SignerStep::OpenApp, SignerStep::GetAddress]);
        match states.last() {
            Some(DeviceActionState::Completed { output }) => {
                assert_eq!(output.address, ADDRESS);
                assert!(output.chain_code.is_none());
            }
            other => panic!("unexpected terminal state: {:?}", other),
        }
        assert_eq!(states.iter().filter(|s| s.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_sign_message_recovers() {
        let setup = setup().await;
        let states = collect(signer(&setup).sign_message(
            DEFAULT_DERIVATION_PATH,
            "hello",
            MessageOptions::default(),
        ))
        .await;

        let Some(DeviceActionState::Completed { output }) = states.last() else {
            panic!("message signing did not complete");
        };
        assert!(output.v == 27 || output.v == 28);
        let recovered = output
            .to_ethers(output.v)
            .recover(H256::from(personal_sign_hash(b"hello")))
            .unwrap();
        assert_eq!(recovered, address());
    }

    #[tokio::test]
    async fn test_sign_typed_data_recovers() {
        let setup = setup().await;
        let typed = TypedData::from_json(
            r#"{
                "types": {"Note": [{"name": "body", "type": "string"}]},
                "primaryType": "Note",
                "domain": {"name": "Notes", "chainId": 1},
                "message": {"body": "gm"}
            }"#,
        )
        .unwrap();

        let states = collect(signer(&setup).sign_typed_data(
            DEFAULT_DERIVATION_PATH,
            &typed,
            TypedDataOptions::default(),
        ))
        .await;

        assert_eq!(
            steps(&states),
            vec![SignerStep::OpenApp, SignerStep::BuildContext, SignerStep::SignTypedData]
        );
        let Some(DeviceActionState::Completed { output }) = states.last() else {
            panic!("typed data signing did not complete");
        };
        let digest = H256::from(typed.signing_hash().unwrap());
        let recovered: Address = EthersSignature::recover(&output.to_ethers(output.v), digest).unwrap();
        assert_eq!(recovered, address());
    }

    #[tokio::test]
    async fn test_user_rejection() {
        let setup = setup().await;
        setup.simulator.device().set_reject_signing(true);

        let states = collect(signer(&setup).sign_message(
            DEFAULT_DERIVATION_PATH,
            "hello",
            MessageOptions::default(),
        ))
        .await;
        assert_eq!(
            states.last(),
            Some(&DeviceActionState::Error {
                error: DeviceActionError::UserRejected
            })
        );
    }

    #[tokio::test]
    async fn test_released_session_fails() {
        let setup = setup().await;
        let signer = signer(&setup);
        setup.dmk.disconnect(&setup.session_id).await.unwrap();

        let states = collect(signer.get_address(DEFAULT_DERIVATION_PATH, AddressOptions::default())).await;
        assert!(matches!(
            states.last(),
            Some(DeviceActionState::Error {
                error: DeviceActionError::SessionNotFound(_)
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let setup = setup().await;
        let states = collect(signer(&setup).get_address("44'/x", AddressOptions::default())).await;
        assert!(matches!(
            states.last(),
            Some(DeviceActionState::Error {
                error: DeviceActionError::InvalidInput(_)
            })
        ));
        assert_eq!(setup.simulator.device().exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_skip_open_app() {
        let setup = setup().await;
        let states = collect(signer(&setup).get_address(
            DEFAULT_DERIVATION_PATH,
            AddressOptions {
                skip_open_app: true,
                return_chain_code: true,
                ..AddressOptions::default()
            },
        ))
        .await;
        assert_eq!(steps(&states), vec![SignerStep::GetAddress]);
        assert_eq!(setup.simulator.device().exchange_count(), 1);
        assert!(matches!(
            states.last(),
            Some(DeviceActionState::Completed { output }) if output.chain_code.is_some()
        ));
    }

    struct TokenLoader(Vec<u8>);

    impl TokenLoader {
        fn usdc() -> Self {
            let mut payload = vec![4];
            payload.extend_from_slice(b"USDC");
            payload.extend_from_slice(&[0xa0; 20]);
            payload.extend_from_slice(&6u32.to_be_bytes());
            payload.extend_from_slice(&1u32.to_be_bytes());
            Self(payload)
        }
    }

    impl ContextLoader for TokenLoader {
        fn name(&self) -> &'static str {
            "test-token"
        }

        fn load<'a>(
            &'a self,
            _transaction: &'a TransactionContext,
        ) -> BoxFuture<'a, Result<Vec<ClearSignContext>, ContextError>> {
            let payload = self.0.clone();
            Box::pin(async move { Ok(vec![ClearSignContext::Token { payload }]) })
        }
    }

    fn eip1559_transfer() -> ethers_core::types::transaction::eip2718::TypedTransaction {
        ethers_core::types::Eip1559TransactionRequest::new()
            .to(address())
            .value(1u64)
            .gas(21_000u64)
            .max_fee_per_gas(1u64)
            .max_priority_fee_per_gas(1u64)
            .nonce(0u64)
            .chain_id(1u64)
            .into()
    }

    fn signer_with_loader(setup: &Setup, loader: TokenLoader) -> SignerEth {
        let module = ContextModuleBuilder::new("origin-token")
            .add_loader(Arc::new(loader))
            .build()
            .unwrap();
        SignerEthBuilder::new(Arc::clone(&setup.dmk), setup.session_id.clone(), "origin-token")
            .with_context_module(Arc::new(module))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_sign_transaction_provides_context() {
        let setup = setup().await;
        let signer = signer_with_loader(&setup, TokenLoader::usdc());
        let tx = eip1559_transfer();
        let unsigned = crate::eth::transaction::serialize_unsigned(&tx);

        let states = collect(signer.sign_transaction(
            DEFAULT_DERIVATION_PATH,
            &unsigned,
            TransactionOptions::default(),
        ))
        .await;

        assert_eq!(
            steps(&states),
            vec![
                SignerStep::OpenApp,
                SignerStep::BuildContext,
                SignerStep::ProvideContext,
                SignerStep::SignTransaction
            ]
        );
        assert_eq!(setup.simulator.device().provided_tokens().len(), 1);

        let Some(DeviceActionState::Completed { output }) = states.last() else {
            panic!("transaction signing did not complete");
        };
        assert!(output.v <= 1);
        let recovered = output
            .to_ethers(output.v)
            .recover(tx.sighash())
            .unwrap();
        assert_eq!(recovered, address());
    }

    #[tokio::test]
    async fn test_oversized_descriptor_is_skipped() {
        let setup = setup().await;
        let signer = signer_with_loader(&setup, TokenLoader(vec![0x04; 300]));
        let tx = eip1559_transfer();
        let unsigned = crate::eth::transaction::serialize_unsigned(&tx);

        let states = collect(signer.sign_transaction(
            DEFAULT_DERIVATION_PATH,
            &unsigned,
            TransactionOptions::default(),
        ))
        .await;

        assert!(setup.simulator.device().provided_tokens().is_empty());
        let Some(DeviceActionState::Completed { output }) = states.last() else {
            panic!("signing stopped on an oversized descriptor: {:?}", states.last());
        };
        assert_eq!(output.to_ethers(output.v).recover(tx.sighash()).unwrap(), address());
    }

    #[tokio::test]
    async fn test_cancel_stops_emission() {
        let setup = setup().await;
        let action = signer(&setup).get_address(DEFAULT_DERIVATION_PATH, AddressOptions::default());
        let ExecuteDeviceAction { observable, cancel } = action;
        // current-thread runtime: the task has not run yet
        (cancel.unwrap())();

        let states: Vec<_> = observable.collect().await;
        assert_eq!(states, vec![DeviceActionState::NotStarted]);
    }
}
