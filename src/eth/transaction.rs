//! Transaction serialization and inspection
//!
//! The device signs the canonical unsigned encoding (typed envelope prefix
//! included). Inspection reads back the fields the context module needs
//! without fully decoding the transaction.

use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, U256};
use ethers_core::utils::rlp::{DecoderError, Rlp};

use super::signature::Signature;

/// EIP-2718 envelope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Legacy,
    Eip2930,
    Eip1559,
}

/// Fields of an unsigned transaction relevant for clear signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub tx_type: TransactionType,
    pub chain_id: Option<u64>,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
}

impl TransactionContext {
    /// 4-byte function selector of the calldata, if any
    pub fn selector(&self) -> Option<[u8; 4]> {
        let head = self.data.get(..4)?;
        let mut selector = [0u8; 4];
        selector.copy_from_slice(head);
        Some(selector)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("Empty transaction payload")]
    Empty,

    #[error("Unsupported transaction type 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("Malformed RLP: {0}")]
    Rlp(String),

    #[error("Unexpected field count {0}")]
    FieldCount(usize),
}

impl From<DecoderError> for TransactionError {
    fn from(e: DecoderError) -> Self {
        TransactionError::Rlp(e.to_string())
    }
}

/// Canonical unsigned encoding, typed envelope prefix included
pub fn serialize_unsigned(tx: &TypedTransaction) -> Vec<u8> {
    tx.rlp().to_vec()
}

/// Signed encoding of `tx` with the device signature attached
///
/// Typed transactions carry the parity bit as `v`. Legacy transactions carry
/// the EIP-155 value when a chain id is set, `27 + parity` otherwise.
pub fn serialize_signed(tx: &TypedTransaction, signature: &Signature) -> Vec<u8> {
    let parity = u64::from(signature.y_parity());
    let v = match tx {
        TypedTransaction::Legacy(inner) => match inner.chain_id {
            Some(chain_id) => parity + 35 + 2 * chain_id.as_u64(),
            None => 27 + parity,
        },
        _ => parity,
    };

    tx.rlp_signed(&signature.to_ethers(v)).to_vec()
}

/// Total length of an encoded transaction, read from its envelope and list
/// header; `None` until enough bytes are available
pub fn encoded_transaction_len(bytes: &[u8]) -> Option<usize> {
    let first = *bytes.first()?;
    let (offset, list) = if first <= 0x7f {
        (1, &bytes[1..])
    } else {
        (0, bytes)
    };

    let prefix = *list.first()?;
    match prefix {
        0xc0..=0xf7 => Some(offset + 1 + usize::from(prefix - 0xc0)),
        0xf8..=0xff => {
            let len_of_len = usize::from(prefix - 0xf7);
            let len_bytes = list.get(1..1 + len_of_len)?;
            let len = len_bytes
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            Some(offset + 1 + len_of_len + len)
        }
        _ => None,
    }
}

/// Read type, chain id, destination, value and calldata from unsigned bytes
pub fn inspect_unsigned_transaction(bytes: &[u8]) -> Result<TransactionContext, TransactionError> {
    let first = *bytes.first().ok_or(TransactionError::Empty)?;

    let (tx_type, payload) = match first {
        0x01 => (TransactionType::Eip2930, &bytes[1..]),
        0x02 => (TransactionType::Eip1559, &bytes[1..]),
        b if b >= 0xc0 => (TransactionType::Legacy, bytes),
        other => return Err(TransactionError::UnsupportedType(other)),
    };

    let rlp = Rlp::new(payload);
    let count = rlp.item_count()?;

    // (chain id, to, value, data) positions per layout
    let (chain_idx, to_idx, value_idx, data_idx) = match (tx_type, count) {
        (TransactionType::Legacy, 6) => (None, 3, 4, 5),
        (TransactionType::Legacy, 9) => (Some(6), 3, 4, 5),
        (TransactionType::Eip2930, 8) => (Some(0), 4, 5, 6),
        (TransactionType::Eip1559, 9) => (Some(0), 5, 6, 7),
        (_, n) => return Err(TransactionError::FieldCount(n)),
    };

    let chain_id = match chain_idx {
        Some(idx) => Some(be_to_u64(rlp.at(idx)?.data()?)?),
        None => None,
    };

    let to_bytes = rlp.at(to_idx)?.data()?;
    let to = match to_bytes.len() {
        0 => None,
        20 => Some(Address::from_slice(to_bytes)),
        n => return Err(TransactionError::Rlp(format!("invalid address length {}", n))),
    };

    let value_bytes = rlp.at(value_idx)?.data()?;
    if value_bytes.len() > 32 {
        return Err(TransactionError::Rlp("value exceeds 256 bits".to_string()));
    }
    let value = U256::from_big_endian(value_bytes);
    let data = rlp.at(data_idx)?.data()?.to_vec();

    Ok(TransactionContext {
        tx_type,
        chain_id,
        to,
        value,
        data,
    })
}

fn be_to_u64(bytes: &[u8]) -> Result<u64, TransactionError> {
    if bytes.len() > 8 {
        return Err(TransactionError::Rlp("integer exceeds 64 bits".to_string()));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}
