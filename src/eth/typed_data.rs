//! EIP-712 typed data
//!
//! The device signs typed data in hashed mode: it receives the domain
//! separator and the hash of the primary struct, then signs
//! `keccak256(0x1901 || domainSeparator || hashStruct(message))`.
//!
//! # Reference
//! - <https://eips.ethereum.org/EIPS/eip-712>

use std::collections::{BTreeSet, HashMap};

use ethers_core::types::{I256, U256};
use serde::{Deserialize, Serialize};

use super::crypto::keccak256;

const DOMAIN_TYPE: &str = "EIP712Domain";

/// A field in a struct type definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypedDataField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl TypedDataField {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
        }
    }
}

/// Domain of a typed data payload
///
/// `chain_id` is kept as JSON so both `1` and `"0x1"` are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Domain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifying_contract: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl Eip712Domain {
    pub fn chain_id_u64(&self) -> Option<u64> {
        let value = self.chain_id.as_ref()?;
        if let Some(n) = value.as_u64() {
            return Some(n);
        }
        let s = value.as_str()?;
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        }
    }

    /// Field list of the implicit `EIP712Domain` struct, in canonical order
    fn fields(&self) -> Vec<TypedDataField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(TypedDataField::new("name", "string"));
        }
        if self.version.is_some() {
            fields.push(TypedDataField::new("version", "string"));
        }
        if self.chain_id.is_some() {
            fields.push(TypedDataField::new("chainId", "uint256"));
        }
        if self.verifying_contract.is_some() {
            fields.push(TypedDataField::new("verifyingContract", "address"));
        }
        if self.salt.is_some() {
            fields.push(TypedDataField::new("salt", "bytes32"));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Eip712Error {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Primary type {0} is not defined")]
    InvalidPrimaryType(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid value for type {type_name}: {value}")]
    InvalidValue { type_name: String, value: String },
}

/// Full EIP-712 payload as produced by wallets and dApps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub types: HashMap<String, Vec<TypedDataField>>,
    pub primary_type: String,
    pub domain: Eip712Domain,
    pub message: serde_json::Value,
}

impl TypedData {
    pub fn from_json(json: &str) -> Result<Self, Eip712Error> {
        serde_json::from_str(json).map_err(|e| Eip712Error::InvalidJson(e.to_string()))
    }

    /// Struct definitions with the domain type filled in from the domain
    /// object when the payload omits it
    fn resolved_types(&self) -> HashMap<String, Vec<TypedDataField>> {
        let mut types = self.types.clone();
        types
            .entry(DOMAIN_TYPE.to_string())
            .or_insert_with(|| self.domain.fields());
        types
    }

    pub fn domain_separator(&self) -> Result<[u8; 32], Eip712Error> {
        let types = self.resolved_types();
        let domain = serde_json::to_value(&self.domain)
            .map_err(|e| Eip712Error::InvalidJson(e.to_string()))?;
        hash_struct(DOMAIN_TYPE, &domain, &types)
    }

    /// `hashStruct` of the message under the primary type
    pub fn message_hash(&self) -> Result<[u8; 32], Eip712Error> {
        if !self.types.contains_key(&self.primary_type) {
            return Err(Eip712Error::InvalidPrimaryType(self.primary_type.clone()));
        }
        hash_struct(&self.primary_type, &self.message, &self.resolved_types())
    }

    /// Digest signed by the device
    pub fn signing_hash(&self) -> Result<[u8; 32], Eip712Error> {
        let mut data = Vec::with_capacity(66);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(&self.domain_separator()?);
        data.extend_from_slice(&self.message_hash()?);
        Ok(keccak256(&data))
    }
}

/// `Name(type1 field1,...)` followed by referenced structs in name order
pub fn encode_type(
    type_name: &str,
    types: &HashMap<String, Vec<TypedDataField>>,
) -> Result<String, Eip712Error> {
    let fields = types
        .get(type_name)
        .ok_or_else(|| Eip712Error::UnknownType(type_name.to_string()))?;

    let mut encoded = format_struct(type_name, fields);
    for dependency in dependencies(type_name, types) {
        if let Some(dep_fields) = types.get(&dependency) {
            encoded.push_str(&format_struct(&dependency, dep_fields));
        }
    }
    Ok(encoded)
}

fn format_struct(name: &str, fields: &[TypedDataField]) -> String {
    let members: Vec<String> = fields
        .iter()
        .map(|f| format!("{} {}", f.type_name, f.name))
        .collect();
    format!("{}({})", name, members.join(","))
}

/// Struct types reachable from `root`, excluding `root` itself
fn dependencies(root: &str, types: &HashMap<String, Vec<TypedDataField>>) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut pending = vec![root.to_string()];

    while let Some(current) = pending.pop() {
        let Some(fields) = types.get(&current) else {
            continue;
        };
        for field in fields {
            let base = base_type(&field.type_name);
            if base != root && types.contains_key(base) && found.insert(base.to_string()) {
                pending.push(base.to_string());
            }
        }
    }

    found
}

/// `Person[]` -> `Person`, `uint256[2][]` -> `uint256`
fn base_type(type_name: &str) -> &str {
    match type_name.find('[') {
        Some(pos) => &type_name[..pos],
        None => type_name,
    }
}

pub fn type_hash(
    type_name: &str,
    types: &HashMap<String, Vec<TypedDataField>>,
) -> Result<[u8; 32], Eip712Error> {
    Ok(keccak256(encode_type(type_name, types)?.as_bytes()))
}

/// `keccak256(typeHash || encodeData(value))`
pub fn hash_struct(
    type_name: &str,
    value: &serde_json::Value,
    types: &HashMap<String, Vec<TypedDataField>>,
) -> Result<[u8; 32], Eip712Error> {
    let fields = types
        .get(type_name)
        .ok_or_else(|| Eip712Error::UnknownType(type_name.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| invalid_value(type_name, value))?;

    let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
    encoded.extend_from_slice(&type_hash(type_name, types)?);

    for field in fields {
        let field_value = object
            .get(&field.name)
            .ok_or_else(|| Eip712Error::MissingField(format!("{}.{}", type_name, field.name)))?;
        encoded.extend_from_slice(&encode_field(&field.type_name, field_value, types)?);
    }

    Ok(keccak256(&encoded))
}

/// Single 32-byte word for a member value
fn encode_field(
    type_name: &str,
    value: &serde_json::Value,
    types: &HashMap<String, Vec<TypedDataField>>,
) -> Result<[u8; 32], Eip712Error> {
    if let Some(element_type) = type_name
        .strip_suffix(']')
        .and_then(|t| t.rfind('[').map(|pos| &t[..pos]))
    {
        let items = value
            .as_array()
            .ok_or_else(|| invalid_value(type_name, value))?;
        let mut concatenated = Vec::with_capacity(items.len() * 32);
        for item in items {
            concatenated.extend_from_slice(&encode_field(element_type, item, types)?);
        }
        return Ok(keccak256(&concatenated));
    }

    if types.contains_key(type_name) {
        return hash_struct(type_name, value, types);
    }

    match type_name {
        "string" => {
            let s = value.as_str().ok_or_else(|| invalid_value(type_name, value))?;
            Ok(keccak256(s.as_bytes()))
        }
        "bytes" => Ok(keccak256(&hex_value(type_name, value)?)),
        "bool" => {
            let flag = value.as_bool().ok_or_else(|| invalid_value(type_name, value))?;
            let mut word = [0u8; 32];
            word[31] = u8::from(flag);
            Ok(word)
        }
        "address" => {
            let bytes = hex_value(type_name, value)?;
            if bytes.len() != 20 {
                return Err(invalid_value(type_name, value));
            }
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(&bytes);
            Ok(word)
        }
        t if t.starts_with("bytes") => {
            let bytes = hex_value(type_name, value)?;
            if bytes.len() > 32 {
                return Err(invalid_value(type_name, value));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(word)
        }
        t if t.starts_with("uint") => {
            let mut word = [0u8; 32];
            parse_uint(value)
                .ok_or_else(|| invalid_value(type_name, value))?
                .to_big_endian(&mut word);
            Ok(word)
        }
        t if t.starts_with("int") => {
            let mut word = [0u8; 32];
            parse_int(value)
                .ok_or_else(|| invalid_value(type_name, value))?
                .into_raw()
                .to_big_endian(&mut word);
            Ok(word)
        }
        other => Err(Eip712Error::UnknownType(other.to_string())),
    }
}

fn parse_uint(value: &serde_json::Value) -> Option<U256> {
    if let Some(n) = value.as_u64() {
        return Some(U256::from(n));
    }
    let s = value.as_str()?;
    match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_dec_str(s).ok(),
    }
}

fn parse_int(value: &serde_json::Value) -> Option<I256> {
    if let Some(n) = value.as_i64() {
        return Some(I256::from(n));
    }
    I256::from_dec_str(value.as_str()?).ok()
}

fn hex_value(type_name: &str, value: &serde_json::Value) -> Result<Vec<u8>, Eip712Error> {
    let s = value.as_str().ok_or_else(|| invalid_value(type_name, value))?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|_| invalid_value(type_name, value))
}

fn invalid_value(type_name: &str, value: &serde_json::Value) -> Eip712Error {
    Eip712Error::InvalidValue {
        type_name: type_name.to_string(),
        value: value.to_string(),
    }
}
