//! Device transports
//!
//! A transport discovers devices and opens an APDU channel to one of them.
//! Two transports ship with the crate: the Speculos emulator REST API and an
//! in-process simulator of the Ethereum app.

pub mod apdu;
pub mod simulator;
pub mod speculos;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, ConnectorResult};

pub use apdu::{status, Apdu, ApduResponse, MAX_APDU_DATA};
pub use simulator::SimulatorTransport;
pub use speculos::SpeculosTransport;

/// Transport identifiers known to the device management kit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportIdentifier {
    Speculos,
    Simulator,
}

impl TransportIdentifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportIdentifier::Speculos => "SPECULOS",
            TransportIdentifier::Simulator => "SIMULATOR",
        }
    }
}

impl fmt::Display for TransportIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportIdentifier {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SPECULOS" => Ok(TransportIdentifier::Speculos),
            "SIMULATOR" => Ok(TransportIdentifier::Simulator),
            other => Err(ConnectorError::transport_not_found(format!(
                "Unknown transport: {}",
                other
            ))),
        }
    }
}

/// Device reported by a transport during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: String,
    pub transport: TransportIdentifier,
}

/// Open APDU channel to a device
pub trait ApduExchange: Send + Sync {
    fn exchange(&self, apdu: Apdu) -> BoxFuture<'_, ConnectorResult<ApduResponse>>;
}

/// Device discovery and channel opening
pub trait Transport: Send + Sync {
    fn identifier(&self) -> TransportIdentifier;

    fn start_discovering(&self) -> BoxStream<'static, DiscoveredDevice>;

    fn connect(
        &self,
        device: &DiscoveredDevice,
    ) -> BoxFuture<'_, ConnectorResult<Arc<dyn ApduExchange>>>;
}
