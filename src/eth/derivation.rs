//! BIP-32 derivation paths
//!
//! Paths are written the way the device SDK expects them, without the
//! leading `m/` (`"44'/60'/0'/0/0"`). A leading `m/` is accepted and dropped.

use std::fmt;
use std::str::FromStr;

/// Hardened offset for BIP-32 derivation
pub const HARDENED: u32 = 0x8000_0000;

/// Maximum depth accepted by the Ethereum app
pub const MAX_PATH_DEPTH: usize = 10;

/// Single component of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationComponent {
    pub index: u32,
    pub hardened: bool,
}

impl DerivationComponent {
    pub fn new(index: u32, hardened: bool) -> Self {
        Self { index, hardened }
    }

    /// Get the full index including hardened bit
    pub fn full_index(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED
        } else {
            self.index
        }
    }

    pub fn from_full_index(raw: u32) -> Self {
        Self::new(raw & !HARDENED, raw & HARDENED != 0)
    }
}

impl fmt::Display for DerivationComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerivationPathError {
    #[error("Empty derivation path")]
    Empty,

    #[error("Invalid path component '{0}'")]
    InvalidComponent(String),

    #[error("Path component {0} exceeds maximum value")]
    IndexOverflow(u32),

    #[error("Derivation path too deep: {0} components (max {MAX_PATH_DEPTH})")]
    TooDeep(usize),
}

/// Parsed derivation path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    components: Vec<DerivationComponent>,
}

impl DerivationPath {
    pub fn components(&self) -> &[DerivationComponent] {
        &self.components
    }

    /// Wire form used by the Ethereum app: depth byte then big-endian indices
    pub fn to_apdu_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.components.len() * 4);
        out.push(self.components.len() as u8);
        for component in &self.components {
            out.extend_from_slice(&component.full_index().to_be_bytes());
        }
        out
    }

    /// Parse the wire form, returning the path and the bytes that follow it
    pub fn from_apdu_bytes(data: &[u8]) -> Result<(Self, &[u8]), DerivationPathError> {
        let depth = *data.first().ok_or(DerivationPathError::Empty)? as usize;
        if depth == 0 {
            return Err(DerivationPathError::Empty);
        }
        if depth > MAX_PATH_DEPTH {
            return Err(DerivationPathError::TooDeep(depth));
        }

        let end = 1 + depth * 4;
        let body = data
            .get(1..end)
            .ok_or_else(|| DerivationPathError::InvalidComponent("truncated path".to_string()))?;

        let components = body
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                DerivationComponent::from_full_index(raw)
            })
            .collect();

        Ok((Self { components }, &data[end..]))
    }

    /// Notation understood by BIP-32 libraries (`m/44'/60'/...`)
    pub fn to_bip32_string(&self) -> String {
        format!("m/{}", self)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("/"))
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationPathError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let trimmed = path.trim();
        let body = trimmed
            .strip_prefix("m/")
            .or_else(|| trimmed.strip_prefix("M/"))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(DerivationPathError::Empty);
        }

        let components = body
            .split('/')
            .map(parse_component)
            .collect::<Result<Vec<_>, _>>()?;

        if components.len() > MAX_PATH_DEPTH {
            return Err(DerivationPathError::TooDeep(components.len()));
        }

        Ok(Self { components })
    }
}

/// Parse a single path component
fn parse_component(s: &str) -> Result<DerivationComponent, DerivationPathError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(DerivationPathError::InvalidComponent(s.to_string()));
    }

    let (number_str, hardened) = match trimmed.strip_suffix(['\'', 'h', 'H']) {
        Some(number) => (number, true),
        None => (trimmed, false),
    };

    let index: u32 = number_str
        .parse()
        .map_err(|_| DerivationPathError::InvalidComponent(s.to_string()))?;

    if index >= HARDENED {
        return Err(DerivationPathError::IndexOverflow(index));
    }

    Ok(DerivationComponent::new(index, hardened))
}
