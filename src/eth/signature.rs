//! ECDSA signature as returned by the device, and its serialized forms

use ethers_core::types::{Signature as EthersSignature, U256};
use serde::{Deserialize, Serialize};

/// Non-serialized secp256k1 signature
///
/// `v` is whatever the device reported: `27/28` for messages and typed data,
/// a bare parity for typed transactions, or an EIP-155 value for legacy
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "crate::serde_bytes::hex32")]
    pub r: [u8; 32],
    #[serde(with = "crate::serde_bytes::hex32")]
    pub s: [u8; 32],
    pub v: u64,
}

impl Signature {
    pub fn new(r: [u8; 32], s: [u8; 32], v: u64) -> Self {
        Self { r, s, v }
    }

    /// Parse the Ethereum app response layout: v (1 byte) || r (32) || s (32)
    pub fn from_vrs(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < 65 {
            return Err(format!("expected 65 bytes, got {}", bytes.len()));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[1..33]);
        s.copy_from_slice(&bytes[33..65]);

        Ok(Self::new(r, s, u64::from(bytes[0])))
    }

    /// 65-byte layout: r || s || recovery id
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = normalize_recovery_id(self.v) as u8;
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    pub fn y_parity(&self) -> u8 {
        y_parity(self.v)
    }

    /// Convert for RLP encoding with an explicit `v`
    pub fn to_ethers(&self, v: u64) -> EthersSignature {
        EthersSignature {
            r: U256::from_big_endian(&self.r),
            s: U256::from_big_endian(&self.s),
            v,
        }
    }
}

/// Recovery id from a raw `v`: values of 27 and above have 27 subtracted,
/// smaller values pass through
pub fn normalize_recovery_id(v: u64) -> u64 {
    if v >= 27 {
        v - 27
    } else {
        v
    }
}

/// Parity bit (0 or 1) carried by a raw `v`
///
/// EIP-155 values (`chainId * 2 + 35 + parity`) are reduced first.
pub fn y_parity(v: u64) -> u8 {
    if v >= 35 {
        return ((v - 35) % 2) as u8;
    }
    if normalize_recovery_id(v) == 0 {
        0
    } else {
        1
    }
}

/// Serialize a device signature as `0x` + r || s || recovery id
pub fn signature_to_hex(signature: &Signature) -> String {
    signature.to_hex()
}
