//! Ethereum primitives used by the signer, the simulator and the account
//! adapter: signature layout, derivation paths, hashing, EIP-712 and
//! transaction inspection.

pub mod crypto;
pub mod derivation;
pub mod signature;
pub mod transaction;
pub mod typed_data;

pub use crypto::{keccak256, personal_sign_hash, public_key_to_address, to_checksum_address};
pub use derivation::{DerivationComponent, DerivationPath, HARDENED};
pub use signature::{normalize_recovery_id, signature_to_hex, y_parity, Signature};
pub use transaction::{inspect_unsigned_transaction, TransactionContext};
pub use typed_data::{Eip712Domain, Eip712Error, TypedData, TypedDataField};
