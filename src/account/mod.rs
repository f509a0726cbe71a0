//! Chain-account abstraction
//!
//! An [`Account`] is what a generic Ethereum client needs to sign on behalf
//! of an address. [`LedgerAccount`] implements it over a device connection.

mod ledger;

pub use ledger::{to_ledger_account, LedgerAccount};

use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::Address;
use futures::future::BoxFuture;

use crate::device_action::DeviceActionError;
use crate::eth::TypedData;

/// Message accepted by [`Account::sign_message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignableMessage {
    Text(String),
    Raw(Vec<u8>),
}

impl From<&str> for SignableMessage {
    fn from(text: &str) -> Self {
        SignableMessage::Text(text.to_string())
    }
}

impl From<Vec<u8>> for SignableMessage {
    fn from(raw: Vec<u8>) -> Self {
        SignableMessage::Raw(raw)
    }
}

/// Every signing method returns `0x`-prefixed hex
pub trait Account: Send + Sync {
    fn address(&self) -> Address;

    fn sign_message(&self, message: SignableMessage) -> BoxFuture<'_, Result<String, DeviceActionError>>;

    fn sign_transaction<'a>(
        &'a self,
        transaction: &'a TypedTransaction,
    ) -> BoxFuture<'a, Result<String, DeviceActionError>>;

    fn sign_typed_data<'a>(
        &'a self,
        typed_data: &'a TypedData,
    ) -> BoxFuture<'a, Result<String, DeviceActionError>>;
}
