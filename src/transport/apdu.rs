//! APDU command and response framing

use crate::error::{ConnectorError, ConnectorResult};

/// Maximum payload of a short APDU
pub const MAX_APDU_DATA: usize = 255;

/// Status words returned by the Ethereum app
pub mod status {
    pub const OK: u16 = 0x9000;
    pub const USER_REJECTED: u16 = 0x6985;
    pub const DEVICE_LOCKED: u16 = 0x5515;
    pub const INVALID_DATA: u16 = 0x6a80;
    pub const INS_NOT_SUPPORTED: u16 = 0x6d00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6e00;
    pub const APP_NOT_OPEN: u16 = 0x6511;
}

/// Short APDU command: CLA INS P1 P2 Lc DATA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Apdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> ConnectorResult<Self> {
        if data.len() > MAX_APDU_DATA {
            return Err(ConnectorError::invalid_input(format!(
                "APDU payload too large: {} bytes",
                data.len()
            )));
        }
        self.data = data;
        Ok(self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.data.len());
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> ConnectorResult<Self> {
        if raw.len() < 5 {
            return Err(ConnectorError::transport("APDU shorter than header"));
        }
        let lc = raw[4] as usize;
        let data = raw
            .get(5..5 + lc)
            .ok_or_else(|| ConnectorError::transport("APDU shorter than its Lc"))?;

        Ok(Self {
            cla: raw[0],
            ins: raw[1],
            p1: raw[2],
            p2: raw[3],
            data: data.to_vec(),
        })
    }
}

/// Response payload followed by a 2-byte status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: u16,
}

impl ApduResponse {
    pub fn new(data: Vec<u8>, status: u16) -> Self {
        Self { data, status }
    }

    pub fn ok(data: Vec<u8>) -> Self {
        Self::new(data, status::OK)
    }

    pub fn status_only(status: u16) -> Self {
        Self::new(Vec::new(), status)
    }

    pub fn is_success(&self) -> bool {
        self.status == status::OK
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        out.extend_from_slice(&self.status.to_be_bytes());
        out
    }

    pub fn from_bytes(raw: &[u8]) -> ConnectorResult<Self> {
        if raw.len() < 2 {
            return Err(ConnectorError::transport("Response missing status word"));
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self::new(data.to_vec(), u16::from_be_bytes([sw[0], sw[1]])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_framing() {
        let apdu = Apdu::new(0xe0, 0x02, 0x00, 0x01)
            .with_data(vec![0xaa, 0xbb])
            .unwrap();
        assert_eq!(apdu.to_bytes(), vec![0xe0, 0x02, 0x00, 0x01, 0x02, 0xaa, 0xbb]);
        assert_eq!(Apdu::from_bytes(&apdu.to_bytes()).unwrap(), apdu);
    }

    #[test]
    fn test_payload_limit() {
        assert!(Apdu::new(0xe0, 0x04, 0, 0).with_data(vec![0; 255]).is_ok());
        assert!(Apdu::new(0xe0, 0x04, 0, 0).with_data(vec![0; 256]).is_err());
    }

    #[test]
    fn test_truncated_command() {
        assert!(Apdu::from_bytes(&[0xe0, 0x02]).is_err());
        assert!(Apdu::from_bytes(&[0xe0, 0x02, 0, 0, 3, 1]).is_err());
    }

    #[test]
    fn test_response_status_split() {
        let response = ApduResponse::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert_eq!(response.data, vec![0x01, 0x02]);
        assert!(response.is_success());

        let rejected = ApduResponse::from_bytes(&[0x69, 0x85]).unwrap();
        assert_eq!(rejected.status, status::USER_REJECTED);
        assert!(rejected.data.is_empty());
        assert_eq!(rejected.to_bytes(), vec![0x69, 0x85]);

        assert!(ApduResponse::from_bytes(&[0x90]).is_err());
    }
}
