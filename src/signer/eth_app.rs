//! Ethereum app APDU protocol
//!
//! Command builders and response parsers for the instructions the signer
//! uses. Payloads longer than one APDU are split in 255-byte chunks; the first
//! chunk carries the derivation path (and the total length for messages).

use crate::device_action::DeviceActionError;
use crate::eth::{to_checksum_address, DerivationPath, Signature};
use crate::transport::{status, Apdu, ApduResponse, MAX_APDU_DATA};

use super::GetAddressOutput;

pub const CLA: u8 = 0xe0;
pub const INS_GET_ADDRESS: u8 = 0x02;
pub const INS_SIGN_TRANSACTION: u8 = 0x04;
pub const INS_GET_APP_CONFIGURATION: u8 = 0x06;
pub const INS_SIGN_PERSONAL_MESSAGE: u8 = 0x08;
pub const INS_PROVIDE_ERC20_INFO: u8 = 0x0a;
pub const INS_SIGN_EIP712: u8 = 0x0c;

pub const P1_FIRST_CHUNK: u8 = 0x00;
pub const P1_MORE_CHUNKS: u8 = 0x80;

const P1_NO_DISPLAY: u8 = 0x00;
const P1_DISPLAY: u8 = 0x01;
const P2_NO_CHAINCODE: u8 = 0x00;
const P2_CHAINCODE: u8 = 0x01;

/// Map a non-success status word to the action error
pub fn status_to_error(sw: u16) -> DeviceActionError {
    match sw {
        status::USER_REJECTED => DeviceActionError::UserRejected,
        status::DEVICE_LOCKED => DeviceActionError::DeviceLocked,
        status::INVALID_DATA => DeviceActionError::InvalidData(format!("status 0x{:04x}", sw)),
        status::INS_NOT_SUPPORTED | status::CLA_NOT_SUPPORTED | status::APP_NOT_OPEN => {
            DeviceActionError::AppNotOpen
        }
        other => DeviceActionError::UnknownStatus(other),
    }
}

/// Payload of a successful response, or the mapped error
pub fn check_status(response: ApduResponse) -> Result<Vec<u8>, DeviceActionError> {
    if response.is_success() {
        Ok(response.data)
    } else {
        Err(status_to_error(response.status))
    }
}

fn apdu(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Apdu, DeviceActionError> {
    Apdu::new(CLA, ins, p1, p2)
        .with_data(data)
        .map_err(|e| DeviceActionError::InvalidInput(e.message))
}

pub fn get_app_configuration_apdu() -> Apdu {
    Apdu::new(CLA, INS_GET_APP_CONFIGURATION, 0x00, 0x00)
}

/// Flags and version reported by the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfiguration {
    pub flags: u8,
    pub version: String,
}

pub fn parse_app_configuration(data: &[u8]) -> Result<AppConfiguration, DeviceActionError> {
    match data {
        [flags, major, minor, patch, ..] => Ok(AppConfiguration {
            flags: *flags,
            version: format!("{}.{}.{}", major, minor, patch),
        }),
        _ => Err(DeviceActionError::InvalidResponse(
            "app configuration too short".to_string(),
        )),
    }
}

pub fn get_address_apdu(
    path: &DerivationPath,
    check_on_device: bool,
    return_chain_code: bool,
) -> Result<Apdu, DeviceActionError> {
    apdu(
        INS_GET_ADDRESS,
        if check_on_device { P1_DISPLAY } else { P1_NO_DISPLAY },
        if return_chain_code { P2_CHAINCODE } else { P2_NO_CHAINCODE },
        path.to_apdu_bytes(),
    )
}

/// `pk_len || pk || addr_len || ascii addr || [chain code]`
pub fn parse_address_response(
    data: &[u8],
    return_chain_code: bool,
) -> Result<GetAddressOutput, DeviceActionError> {
    let invalid = |what: &str| DeviceActionError::InvalidResponse(what.to_string());

    let pk_len = *data.first().ok_or_else(|| invalid("empty address response"))? as usize;
    let public_key = data
        .get(1..1 + pk_len)
        .ok_or_else(|| invalid("truncated public key"))?;

    let addr_offset = 1 + pk_len;
    let addr_len = *data
        .get(addr_offset)
        .ok_or_else(|| invalid("missing address length"))? as usize;
    let ascii = data
        .get(addr_offset + 1..addr_offset + 1 + addr_len)
        .ok_or_else(|| invalid("truncated address"))?;
    let ascii = std::str::from_utf8(ascii).map_err(|_| invalid("address is not ascii"))?;
    let raw_address = hex::decode(ascii.trim_start_matches("0x"))
        .map_err(|_| invalid("address is not hex"))?;
    if raw_address.len() != 20 {
        return Err(invalid("address is not 20 bytes"));
    }

    let chain_code = if return_chain_code {
        let start = addr_offset + 1 + addr_len;
        let bytes = data
            .get(start..start + 32)
            .ok_or_else(|| invalid("missing chain code"))?;
        Some(format!("0x{}", hex::encode(bytes)))
    } else {
        None
    };

    Ok(GetAddressOutput {
        public_key: format!("0x{}", hex::encode(public_key)),
        address: to_checksum_address(&raw_address),
        chain_code,
    })
}

/// Split `prefix || payload` into APDU-sized chunks; the prefix always stays
/// in the first chunk
pub fn chunk_payload(prefix: &[u8], payload: &[u8]) -> Vec<Vec<u8>> {
    let first_room = MAX_APDU_DATA.saturating_sub(prefix.len());
    let split = first_room.min(payload.len());

    let mut first = prefix.to_vec();
    first.extend_from_slice(&payload[..split]);

    let mut chunks = vec![first];
    chunks.extend(payload[split..].chunks(MAX_APDU_DATA).map(|c| c.to_vec()));
    chunks
}

fn chunked_apdus(ins: u8, chunks: Vec<Vec<u8>>) -> Result<Vec<Apdu>, DeviceActionError> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let p1 = if i == 0 { P1_FIRST_CHUNK } else { P1_MORE_CHUNKS };
            apdu(ins, p1, 0x00, chunk)
        })
        .collect()
}

pub fn sign_transaction_apdus(
    path: &DerivationPath,
    transaction: &[u8],
) -> Result<Vec<Apdu>, DeviceActionError> {
    if transaction.is_empty() {
        return Err(DeviceActionError::InvalidInput("empty transaction".to_string()));
    }
    chunked_apdus(
        INS_SIGN_TRANSACTION,
        chunk_payload(&path.to_apdu_bytes(), transaction),
    )
}

pub fn sign_personal_message_apdus(
    path: &DerivationPath,
    message: &[u8],
) -> Result<Vec<Apdu>, DeviceActionError> {
    let len = u32::try_from(message.len())
        .map_err(|_| DeviceActionError::InvalidInput("message too long".to_string()))?;
    let mut prefix = path.to_apdu_bytes();
    prefix.extend_from_slice(&len.to_be_bytes());
    chunked_apdus(INS_SIGN_PERSONAL_MESSAGE, chunk_payload(&prefix, message))
}

/// Hashed EIP-712 signing: path || domain separator || message hash
pub fn sign_eip712_hashed_apdu(
    path: &DerivationPath,
    domain_separator: &[u8; 32],
    message_hash: &[u8; 32],
) -> Result<Apdu, DeviceActionError> {
    let mut data = path.to_apdu_bytes();
    data.extend_from_slice(domain_separator);
    data.extend_from_slice(message_hash);
    apdu(INS_SIGN_EIP712, 0x00, 0x00, data)
}

pub fn provide_erc20_info_apdu(descriptor: &[u8]) -> Result<Apdu, DeviceActionError> {
    apdu(INS_PROVIDE_ERC20_INFO, 0x00, 0x00, descriptor.to_vec())
}

/// `v || r || s`
pub fn parse_signature(data: &[u8]) -> Result<Signature, DeviceActionError> {
    Signature::from_vrs(data).map_err(DeviceActionError::InvalidResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DERIVATION_PATH;

    fn path() -> DerivationPath {
        DEFAULT_DERIVATION_PATH.parse().unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_to_error(0x6985), DeviceActionError::UserRejected);
        assert_eq!(status_to_error(0x5515), DeviceActionError::DeviceLocked);
        assert!(matches!(status_to_error(0x6a80), DeviceActionError::InvalidData(_)));
        assert_eq!(status_to_error(0x6d00), DeviceActionError::AppNotOpen);
        assert_eq!(status_to_error(0x6e00), DeviceActionError::AppNotOpen);
        assert_eq!(status_to_error(0x6511), DeviceActionError::AppNotOpen);
        assert_eq!(status_to_error(0x6f00), DeviceActionError::UnknownStatus(0x6f00));

        assert_eq!(check_status(ApduResponse::ok(vec![1])), Ok(vec![1]));
    }

    #[test]
    fn test_get_address_apdu_flags() {
        let apdu = get_address_apdu(&path(), true, false).unwrap();
        assert_eq!((apdu.ins, apdu.p1, apdu.p2), (INS_GET_ADDRESS, 0x01, 0x00));
        assert_eq!(apdu.data, path().to_apdu_bytes());
    }

    #[test]
    fn test_parse_address_response() {
        let mut data = vec![65];
        data.extend_from_slice(&[0x04; 65]);
        data.push(40);
        data.extend_from_slice(b"f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        data.extend_from_slice(&[0xcc; 32]);

        let output = parse_address_response(&data, true).unwrap();
        assert_eq!(output.address, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(output.public_key.len(), 2 + 130);
        assert_eq!(output.chain_code, Some(format!("0x{}", "cc".repeat(32))));

        assert!(parse_address_response(&data[..70], false).is_err());
    }

    #[test]
    fn test_chunking_keeps_prefix_in_first_chunk() {
        let prefix = [0xaa; 21];
        let payload = vec![0x01; 600];
        let chunks = chunk_payload(&prefix, &payload);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 255);
        assert_eq!(&chunks[0][..21], &prefix);
        assert_eq!(chunks[1].len(), 255);
        assert_eq!(chunks[2].len(), 600 - 234 - 255);
        assert_eq!(chunks.concat().len(), prefix.len() + payload.len());

        assert_eq!(chunk_payload(&prefix, &[]), vec![prefix.to_vec()]);
    }

    #[test]
    fn test_message_apdus() {
        let apdus = sign_personal_message_apdus(&path(), b"hello").unwrap();
        assert_eq!(apdus.len(), 1);
        assert_eq!(apdus[0].p1, P1_FIRST_CHUNK);
        assert_eq!(&apdus[0].data[21..25], &5u32.to_be_bytes());
        assert_eq!(&apdus[0].data[25..], b"hello");

        let long = vec![0u8; 1000];
        let apdus = sign_personal_message_apdus(&path(), &long).unwrap();
        assert!(apdus[1..].iter().all(|a| a.p1 == P1_MORE_CHUNKS));
    }

    #[test]
    fn test_transaction_requires_payload() {
        assert!(sign_transaction_apdus(&path(), &[]).is_err());
    }

    #[test]
    fn test_app_configuration() {
        let config = parse_app_configuration(&[0x01, 1, 10, 3]).unwrap();
        assert_eq!(config.version, "1.10.3");
        assert!(parse_app_configuration(&[0x01]).is_err());
    }
}
