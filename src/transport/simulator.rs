//! In-process simulator of the Ethereum app
//!
//! Keys come from a BIP-39 mnemonic, so addresses and signatures match any
//! wallet loaded with the same phrase. The simulated device implements the
//! subset of the Ethereum app instructions the signer uses. It can be locked
//! or told to reject every signing request.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::bip32::Xpriv;
use bitcoin::Network;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

use super::apdu::status;
use super::{Apdu, ApduExchange, ApduResponse, DiscoveredDevice, Transport, TransportIdentifier};
use crate::error::{ConnectorError, ConnectorResult};
use crate::eth::derivation::DerivationPath;
use crate::eth::transaction::encoded_transaction_len;
use crate::eth::{keccak256, personal_sign_hash, public_key_to_address};
use crate::signer::eth_app::{
    CLA, INS_GET_ADDRESS, INS_GET_APP_CONFIGURATION, INS_PROVIDE_ERC20_INFO,
    INS_SIGN_EIP712, INS_SIGN_PERSONAL_MESSAGE, INS_SIGN_TRANSACTION, P1_FIRST_CHUNK,
    P1_MORE_CHUNKS,
};

const TECHNICAL_PROBLEM: u16 = 0x6f00;

/// Version reported by GET APP CONFIGURATION
const APP_VERSION: [u8; 3] = [1, 10, 3];

pub const SIMULATOR_DEVICE_ID: &str = "simulator-0";

/// Chunked signing request being accumulated
struct PendingSignature {
    ins: u8,
    path: DerivationPath,
    expected: Option<usize>,
    buffer: Vec<u8>,
}

/// Emulated device state
pub struct SimulatedDevice {
    master: Xpriv,
    secp: Secp256k1<All>,
    reject_signing: AtomicBool,
    locked: AtomicBool,
    pending: Mutex<Option<PendingSignature>>,
    provided_tokens: Mutex<Vec<Vec<u8>>>,
    exchanges: AtomicUsize,
}

impl SimulatedDevice {
    pub fn from_mnemonic(phrase: &str) -> ConnectorResult<Self> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase.trim())
            .map_err(|e| ConnectorError::invalid_config(format!("Invalid mnemonic: {}", e)))?;
        let mut seed = mnemonic.to_seed_normalized("");

        let master = Xpriv::new_master(Network::Bitcoin, &seed);
        seed.zeroize();
        let master = master
            .map_err(|e| ConnectorError::internal(format!("Failed to create master key: {}", e)))?;

        Ok(Self {
            master,
            secp: Secp256k1::new(),
            reject_signing: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            pending: Mutex::new(None),
            provided_tokens: Mutex::new(Vec::new()),
            exchanges: AtomicUsize::new(0),
        })
    }

    pub fn set_reject_signing(&self, reject: bool) {
        self.reject_signing.store(reject, Ordering::SeqCst);
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Raw payloads received through PROVIDE ERC-20 TOKEN INFORMATION
    pub fn provided_tokens(&self) -> Vec<Vec<u8>> {
        self.provided_tokens
            .lock()
            .map(|tokens| tokens.clone())
            .unwrap_or_default()
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Handle one command the way the Ethereum app would
    pub fn process(&self, apdu: &Apdu) -> ApduResponse {
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        if self.locked.load(Ordering::SeqCst) {
            return ApduResponse::status_only(status::DEVICE_LOCKED);
        }
        if apdu.cla != CLA {
            return ApduResponse::status_only(status::CLA_NOT_SUPPORTED);
        }

        let result = match apdu.ins {
            INS_GET_APP_CONFIGURATION => Ok(vec![0x01, APP_VERSION[0], APP_VERSION[1], APP_VERSION[2]]),
            INS_GET_ADDRESS => self.get_address(apdu),
            INS_SIGN_TRANSACTION => self.sign_transaction(apdu),
            INS_SIGN_PERSONAL_MESSAGE => self.sign_personal_message(apdu),
            INS_SIGN_EIP712 => self.sign_eip712_hashed(apdu),
            INS_PROVIDE_ERC20_INFO => self.provide_erc20_info(apdu),
            _ => Err(status::INS_NOT_SUPPORTED),
        };

        match result {
            Ok(data) => ApduResponse::ok(data),
            Err(sw) => ApduResponse::status_only(sw),
        }
    }

    fn derive(&self, path: &DerivationPath) -> Result<(SecretKey, [u8; 32]), u16> {
        let bip32_path: bitcoin::bip32::DerivationPath = path
            .to_bip32_string()
            .parse()
            .map_err(|_| status::INVALID_DATA)?;
        let child = self
            .master
            .derive_priv(&self.secp, &bip32_path)
            .map_err(|_| status::INVALID_DATA)?;

        Ok((child.private_key, child.chain_code.to_bytes()))
    }

    fn get_address(&self, apdu: &Apdu) -> Result<Vec<u8>, u16> {
        let (path, _) = DerivationPath::from_apdu_bytes(&apdu.data).map_err(|_| status::INVALID_DATA)?;
        let (secret, chain_code) = self.derive(&path)?;
        let public_key = PublicKey::from_secret_key(&self.secp, &secret);
        let address = hex::encode(public_key_to_address(&public_key));

        let mut out = Vec::with_capacity(1 + 65 + 1 + 40 + 32);
        out.push(65);
        out.extend_from_slice(&public_key.serialize_uncompressed());
        out.push(address.len() as u8);
        out.extend_from_slice(address.as_bytes());
        if apdu.p2 == 0x01 {
            out.extend_from_slice(&chain_code);
        }
        Ok(out)
    }

    /// Append a chunk to the pending request; returns it once complete
    fn accumulate(
        &self,
        apdu: &Apdu,
        parse_first: fn(&[u8]) -> Result<(DerivationPath, Option<usize>, Vec<u8>), u16>,
    ) -> Result<Option<PendingSignature>, u16> {
        let mut guard = self.pending.lock().map_err(|_| TECHNICAL_PROBLEM)?;
        let previous = guard.take();

        let pending = match apdu.p1 {
            P1_FIRST_CHUNK => {
                let (path, expected, buffer) = parse_first(&apdu.data)?;
                PendingSignature {
                    ins: apdu.ins,
                    path,
                    expected,
                    buffer,
                }
            }
            P1_MORE_CHUNKS => {
                let mut pending = previous
                    .filter(|p| p.ins == apdu.ins)
                    .ok_or(status::INVALID_DATA)?;
                pending.buffer.extend_from_slice(&apdu.data);
                pending
            }
            _ => return Err(status::INVALID_DATA),
        };

        let expected = pending
            .expected
            .or_else(|| encoded_transaction_len(&pending.buffer));
        match expected {
            Some(len) if pending.buffer.len() == len => Ok(Some(pending)),
            Some(len) if pending.buffer.len() > len => Err(status::INVALID_DATA),
            _ => {
                *guard = Some(pending);
                Ok(None)
            }
        }
    }

    /// v || r || s
    fn sign_digest(&self, path: &DerivationPath, digest: [u8; 32], v_base: u8) -> Result<Vec<u8>, u16> {
        if self.reject_signing.load(Ordering::SeqCst) {
            return Err(status::USER_REJECTED);
        }

        let (secret, _) = self.derive(path)?;
        let signature = self
            .secp
            .sign_ecdsa_recoverable(&Message::from_digest(digest), &secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = Vec::with_capacity(65);
        out.push(v_base + recovery_id.to_i32() as u8);
        out.extend_from_slice(&compact);
        Ok(out)
    }

    fn sign_transaction(&self, apdu: &Apdu) -> Result<Vec<u8>, u16> {
        let Some(pending) = self.accumulate(apdu, |data| {
            let (path, rest) = DerivationPath::from_apdu_bytes(data).map_err(|_| status::INVALID_DATA)?;
            Ok((path, None, rest.to_vec()))
        })?
        else {
            return Ok(Vec::new());
        };

        // typed envelopes report the bare parity
        let v_base = if pending.buffer.first().is_some_and(|b| *b <= 0x7f) {
            0
        } else {
            27
        };
        self.sign_digest(&pending.path, keccak256(&pending.buffer), v_base)
    }

    fn sign_personal_message(&self, apdu: &Apdu) -> Result<Vec<u8>, u16> {
        let Some(pending) = self.accumulate(apdu, |data| {
            let (path, rest) = DerivationPath::from_apdu_bytes(data).map_err(|_| status::INVALID_DATA)?;
            let len_bytes: [u8; 4] = rest
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or(status::INVALID_DATA)?;
            Ok((path, Some(u32::from_be_bytes(len_bytes) as usize), rest[4..].to_vec()))
        })?
        else {
            return Ok(Vec::new());
        };

        self.sign_digest(&pending.path, personal_sign_hash(&pending.buffer), 27)
    }

    fn sign_eip712_hashed(&self, apdu: &Apdu) -> Result<Vec<u8>, u16> {
        if apdu.p1 != 0x00 || apdu.p2 != 0x00 {
            return Err(status::INVALID_DATA);
        }
        let (path, rest) = DerivationPath::from_apdu_bytes(&apdu.data).map_err(|_| status::INVALID_DATA)?;
        if rest.len() != 64 {
            return Err(status::INVALID_DATA);
        }

        let mut data = Vec::with_capacity(66);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(rest);
        self.sign_digest(&path, keccak256(&data), 27)
    }

    fn provide_erc20_info(&self, apdu: &Apdu) -> Result<Vec<u8>, u16> {
        let ticker_len = *apdu.data.first().ok_or(status::INVALID_DATA)? as usize;
        // ticker, contract address, decimals, chain id
        if apdu.data.len() < 1 + ticker_len + 20 + 4 + 4 {
            return Err(status::INVALID_DATA);
        }

        let mut tokens = self.provided_tokens.lock().map_err(|_| TECHNICAL_PROBLEM)?;
        tokens.push(apdu.data.clone());
        Ok(vec![(tokens.len() - 1) as u8])
    }
}

impl ApduExchange for SimulatedDevice {
    fn exchange(&self, apdu: Apdu) -> BoxFuture<'_, ConnectorResult<ApduResponse>> {
        Box::pin(async move { Ok(self.process(&apdu)) })
    }
}

/// Transport exposing a single simulated device
#[derive(Clone)]
pub struct SimulatorTransport {
    device: Arc<SimulatedDevice>,
}

impl SimulatorTransport {
    pub fn new(mnemonic: &str) -> ConnectorResult<Self> {
        Ok(Self {
            device: Arc::new(SimulatedDevice::from_mnemonic(mnemonic)?),
        })
    }

    /// Handle on the simulated device, for toggling rejection or lock state
    pub fn device(&self) -> Arc<SimulatedDevice> {
        Arc::clone(&self.device)
    }
}

impl Transport for SimulatorTransport {
    fn identifier(&self) -> TransportIdentifier {
        TransportIdentifier::Simulator
    }

    fn start_discovering(&self) -> BoxStream<'static, DiscoveredDevice> {
        let device = DiscoveredDevice {
            id: SIMULATOR_DEVICE_ID.to_string(),
            name: "Ledger Simulator".to_string(),
            transport: TransportIdentifier::Simulator,
        };
        stream::iter(vec![device]).boxed()
    }

    fn connect(
        &self,
        device: &DiscoveredDevice,
    ) -> BoxFuture<'_, ConnectorResult<Arc<dyn ApduExchange>>> {
        let known = device.id == SIMULATOR_DEVICE_ID;
        let device_id = device.id.clone();
        Box::pin(async move {
            if !known {
                return Err(ConnectorError::connection_failed("Unknown simulator device")
                    .with_details(device_id));
            }
            let channel: Arc<dyn ApduExchange> = self.device.clone();
            Ok(channel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_DERIVATION_PATH, DEFAULT_SIMULATOR_MNEMONIC};
    use crate::eth::to_checksum_address;

    const FIRST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn device() -> SimulatedDevice {
        SimulatedDevice::from_mnemonic(DEFAULT_SIMULATOR_MNEMONIC).unwrap()
    }

    fn path_bytes() -> Vec<u8> {
        DEFAULT_DERIVATION_PATH
            .parse::<DerivationPath>()
            .unwrap()
            .to_apdu_bytes()
    }

    #[test]
    fn test_get_address_matches_development_account() {
        let device = device();
        let apdu = Apdu::new(CLA, INS_GET_ADDRESS, 0x00, 0x01)
            .with_data(path_bytes())
            .unwrap();
        let response = device.process(&apdu);

        assert!(response.is_success());
        assert_eq!(response.data[0], 65);
        assert_eq!(response.data[66], 40);
        let ascii = std::str::from_utf8(&response.data[67..107]).unwrap();
        assert_eq!(to_checksum_address(&hex::decode(ascii).unwrap()), FIRST_ADDRESS);
        assert_eq!(response.data.len(), 107 + 32);

        // version(4) depth(1) fingerprint(4) child(4) chain code(32) key(33)
        let path: DerivationPath = DEFAULT_DERIVATION_PATH.parse().unwrap();
        let seed = bip39::Mnemonic::parse(DEFAULT_SIMULATOR_MNEMONIC)
            .unwrap()
            .to_seed_normalized("");
        let secp = Secp256k1::new();
        let encoded = Xpriv::new_master(Network::Bitcoin, &seed)
            .unwrap()
            .derive_priv(&secp, &path.to_bip32_string().parse::<bitcoin::bip32::DerivationPath>().unwrap())
            .unwrap()
            .encode();
        assert_eq!(&response.data[107..], &encoded[13..45]);
    }

    #[test]
    fn test_derive_reuses_context() {
        let device = device();
        let first: DerivationPath = DEFAULT_DERIVATION_PATH.parse().unwrap();
        let second: DerivationPath = "44'/60'/0'/0/1".parse().unwrap();

        let (key, chain_code) = device.derive(&first).unwrap();
        assert_eq!(device.derive(&first).unwrap(), (key, chain_code));
        let (other, _) = device.derive(&second).unwrap();
        assert_eq!(
            to_checksum_address(&public_key_to_address(&PublicKey::from_secret_key(&device.secp, &other))),
            "0x70997970C51812dc3A010C7d01b50e89d705F5d1"
        );
    }

    #[test]
    fn test_unknown_instruction_and_class() {
        let device = device();
        assert_eq!(device.process(&Apdu::new(CLA, 0x7f, 0, 0)).status, status::INS_NOT_SUPPORTED);
        assert_eq!(device.process(&Apdu::new(0xb0, 0x01, 0, 0)).status, status::CLA_NOT_SUPPORTED);
    }

    #[test]
    fn test_locked_device() {
        let device = device();
        device.set_locked(true);
        let response = device.process(&Apdu::new(CLA, INS_GET_APP_CONFIGURATION, 0, 0));
        assert_eq!(response.status, status::DEVICE_LOCKED);
    }

    #[test]
    fn test_personal_message_in_chunks() {
        let device = device();
        let message = vec![0x61u8; 300];

        let mut first = path_bytes();
        first.extend_from_slice(&(message.len() as u32).to_be_bytes());
        let room = 255 - first.len();
        first.extend_from_slice(&message[..room]);

        let response = device.process(
            &Apdu::new(CLA, INS_SIGN_PERSONAL_MESSAGE, P1_FIRST_CHUNK, 0)
                .with_data(first)
                .unwrap(),
        );
        assert!(response.is_success());
        assert!(response.data.is_empty());

        let response = device.process(
            &Apdu::new(CLA, INS_SIGN_PERSONAL_MESSAGE, P1_MORE_CHUNKS, 0)
                .with_data(message[room..].to_vec())
                .unwrap(),
        );
        assert!(response.is_success());
        assert_eq!(response.data.len(), 65);
        assert!(response.data[0] == 27 || response.data[0] == 28);
    }

    #[test]
    fn test_continuation_without_start_is_rejected() {
        let device = device();
        let response = device.process(
            &Apdu::new(CLA, INS_SIGN_TRANSACTION, P1_MORE_CHUNKS, 0)
                .with_data(vec![0x01])
                .unwrap(),
        );
        assert_eq!(response.status, status::INVALID_DATA);
    }

    #[test]
    fn test_reject_signing() {
        let device = device();
        device.set_reject_signing(true);

        let mut data = path_bytes();
        data.extend_from_slice(&[0x11; 64]);
        let response = device.process(
            &Apdu::new(CLA, INS_SIGN_EIP712, 0, 0).with_data(data).unwrap(),
        );
        assert_eq!(response.status, status::USER_REJECTED);
    }

    #[test]
    fn test_erc20_info_recorded() {
        let device = device();
        let mut data = vec![4];
        data.extend_from_slice(b"USDC");
        data.extend_from_slice(&[0xa0; 20]);
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());

        let response = device.process(
            &Apdu::new(CLA, INS_PROVIDE_ERC20_INFO, 0, 0).with_data(data).unwrap(),
        );
        assert!(response.is_success());
        assert_eq!(device.provided_tokens().len(), 1);

        let response = device.process(
            &Apdu::new(CLA, INS_PROVIDE_ERC20_INFO, 0, 0).with_data(vec![4, b'U']).unwrap(),
        );
        assert_eq!(response.status, status::INVALID_DATA);
    }

    #[test]
    fn test_invalid_mnemonic() {
        assert!(SimulatorTransport::new("not a mnemonic").is_err());
    }

    #[tokio::test]
    async fn test_discovery_and_connect() {
        let transport = SimulatorTransport::new(DEFAULT_SIMULATOR_MNEMONIC).unwrap();
        let devices: Vec<_> = transport.start_discovering().collect().await;
        assert_eq!(devices.len(), 1);

        let channel = transport.connect(&devices[0]).await.unwrap();
        let response = channel
            .exchange(Apdu::new(CLA, INS_GET_APP_CONFIGURATION, 0, 0))
            .await
            .unwrap();
        assert_eq!(response.data, vec![0x01, 1, 10, 3]);
        assert_eq!(transport.device().exchange_count(), 1);
    }
}
