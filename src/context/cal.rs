//! Crypto-assets list (CAL) token loader
//!
//! For ERC-20 `transfer` and `approve` calls, fetches the signed token
//! descriptor of the called contract so the device can show the ticker and
//! amount instead of raw calldata.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;

use super::{ClearSignContext, ContextError, ContextLoader};
use crate::config::{CalConfig, CalMode};
use crate::error::{ConnectorError, ConnectorResult};
use crate::eth::{to_checksum_address, TransactionContext};

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// `approve(address,uint256)`
pub const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

const ORIGIN_HEADER: &str = "X-Ledger-Origin-Token";

#[derive(Debug, Deserialize)]
struct TokenEntry {
    descriptor: Option<TokenDescriptor>,
}

#[derive(Debug, Deserialize)]
struct TokenDescriptor {
    data: String,
    signatures: DescriptorSignatures,
}

#[derive(Debug, Deserialize)]
struct DescriptorSignatures {
    prod: Option<String>,
    test: Option<String>,
}

pub struct CalTokenLoader {
    config: CalConfig,
    origin_token: String,
    client: Client,
}

impl CalTokenLoader {
    pub fn new(config: CalConfig, origin_token: String) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConnectorError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            origin_token,
            client,
        })
    }

    fn tokens_url(&self, contract: &str, chain_id: u64) -> String {
        format!(
            "{}/tokens?contract_address={}&chain_id={}&output=descriptor&ref=branch:{}",
            self.config.url.trim_end_matches('/'),
            contract,
            chain_id,
            self.config.branch
        )
    }
}

/// Whether the calldata targets an ERC-20 method with a token descriptor
pub fn is_erc20_call(transaction: &TransactionContext) -> bool {
    matches!(
        transaction.selector(),
        Some(TRANSFER_SELECTOR) | Some(APPROVE_SELECTOR)
    )
}

/// Descriptor data followed by the signature for `mode`
pub fn parse_token_response(body: &str, mode: CalMode) -> Result<Vec<u8>, ContextError> {
    let entries: Vec<TokenEntry> =
        serde_json::from_str(body).map_err(|e| ContextError::InvalidPayload(e.to_string()))?;

    let descriptor = entries
        .into_iter()
        .find_map(|entry| entry.descriptor)
        .ok_or_else(|| ContextError::NotFound("token".to_string()))?;

    let signature = match mode {
        CalMode::Prod => descriptor.signatures.prod,
        CalMode::Test => descriptor.signatures.test,
    }
    .ok_or_else(|| ContextError::InvalidPayload(format!("no {} signature", mode.as_str())))?;

    let mut payload = hex::decode(descriptor.data.trim_start_matches("0x"))
        .map_err(|e| ContextError::InvalidPayload(e.to_string()))?;
    payload.extend(
        hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| ContextError::InvalidPayload(e.to_string()))?,
    );
    Ok(payload)
}

impl ContextLoader for CalTokenLoader {
    fn name(&self) -> &'static str {
        "cal-token"
    }

    fn load<'a>(
        &'a self,
        transaction: &'a TransactionContext,
    ) -> BoxFuture<'a, Result<Vec<ClearSignContext>, ContextError>> {
        Box::pin(async move {
            let (Some(to), Some(chain_id)) = (transaction.to, transaction.chain_id) else {
                return Ok(Vec::new());
            };
            if !is_erc20_call(transaction) {
                return Ok(Vec::new());
            }

            let contract = to_checksum_address(to.as_bytes());
            let response = self
                .client
                .get(self.tokens_url(&contract, chain_id))
                .header(ORIGIN_HEADER, &self.origin_token)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(ContextError::Http(response.status().as_u16()));
            }

            let body = response.text().await?;
            let payload = parse_token_response(&body, self.config.mode)
                .map_err(|e| match e {
                    ContextError::NotFound(_) => ContextError::NotFound(contract.clone()),
                    other => other,
                })?;

            Ok(vec![ClearSignContext::Token { payload }])
        })
    }
}
