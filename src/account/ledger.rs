use std::sync::Arc;

use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::Address;
use futures::future::BoxFuture;

use super::{Account, SignableMessage};
use crate::connector::LedgerConnection;
use crate::device_action::{run_device_action_once, DeviceActionError};
use crate::eth::transaction::{serialize_signed, serialize_unsigned};
use crate::eth::{signature_to_hex, TypedData};
use crate::signer::{MessageOptions, MessagePayload, SignerEth, TransactionOptions, TypedDataOptions};

/// Account backed by a connected device; always signs at the connection's
/// derivation path
#[derive(Clone)]
pub struct LedgerAccount {
    signer: Arc<SignerEth>,
    derivation_path: String,
    address: Address,
}

pub fn to_ledger_account(connection: &LedgerConnection) -> LedgerAccount {
    LedgerAccount {
        signer: Arc::clone(&connection.signer),
        derivation_path: connection.derivation_path.clone(),
        address: connection.address,
    }
}

impl LedgerAccount {
    pub fn derivation_path(&self) -> &str {
        &self.derivation_path
    }
}

impl Account for LedgerAccount {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_message(&self, message: SignableMessage) -> BoxFuture<'_, Result<String, DeviceActionError>> {
        let payload = match message {
            SignableMessage::Text(text) => MessagePayload::Text(text),
            SignableMessage::Raw(raw) => MessagePayload::Hex(format!("0x{}", hex::encode(raw))),
        };

        Box::pin(async move {
            let signature = run_device_action_once(
                || {
                    self.signer
                        .sign_message(&self.derivation_path, payload, MessageOptions::default())
                },
                None,
            )
            .await?;
            Ok(signature_to_hex(&signature))
        })
    }

    fn sign_transaction<'a>(
        &'a self,
        transaction: &'a TypedTransaction,
    ) -> BoxFuture<'a, Result<String, DeviceActionError>> {
        Box::pin(async move {
            let unsigned = serialize_unsigned(transaction);
            let signature = run_device_action_once(
                || {
                    self.signer.sign_transaction(
                        &self.derivation_path,
                        &unsigned,
                        TransactionOptions::default(),
                    )
                },
                None,
            )
            .await?;

            let signed = serialize_signed(transaction, &signature);
            Ok(format!("0x{}", hex::encode(signed)))
        })
    }

    fn sign_typed_data<'a>(
        &'a self,
        typed_data: &'a TypedData,
    ) -> BoxFuture<'a, Result<String, DeviceActionError>> {
        Box::pin(async move {
            let signature = run_device_action_once(
                || {
                    self.signer.sign_typed_data(
                        &self.derivation_path,
                        typed_data,
                        TypedDataOptions::default(),
                    )
                },
                None,
            )
            .await?;
            Ok(signature_to_hex(&signature))
        })
    }
}
