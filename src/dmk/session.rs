//! Device sessions and the optional session refresher

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::Loggers;
use crate::logging::LogEntry;
use crate::signer::eth_app;
use crate::transport::{ApduExchange, DiscoveredDevice};

/// Opaque identifier of a connected device session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Random 128-bit hex identifier
    pub(crate) fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Background keep-alive of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRefresherOptions {
    pub is_refresher_disabled: bool,
    pub polling_interval: Duration,
}

impl SessionRefresherOptions {
    pub fn disabled() -> Self {
        Self {
            is_refresher_disabled: true,
            ..Self::default()
        }
    }
}

impl Default for SessionRefresherOptions {
    fn default() -> Self {
        Self {
            is_refresher_disabled: false,
            polling_interval: Duration::from_millis(1000),
        }
    }
}

/// Entry of the session table
pub(crate) struct DeviceSession {
    pub device: DiscoveredDevice,
    pub channel: Arc<dyn ApduExchange>,
    pub connected_at: DateTime<Utc>,
    refresher: Option<JoinHandle<()>>,
}

impl DeviceSession {
    pub fn new(device: DiscoveredDevice, channel: Arc<dyn ApduExchange>) -> Self {
        Self {
            device,
            channel,
            connected_at: Utc::now(),
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, handle: JoinHandle<()>) -> Self {
        self.refresher = Some(handle);
        self
    }

    pub fn has_refresher(&self) -> bool {
        self.refresher.is_some()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(handle) = self.refresher.take() {
            handle.abort();
        }
    }
}

/// Ping the device with GET APP CONFIGURATION every `interval`
pub(crate) fn spawn_refresher(
    session_id: SessionId,
    channel: Arc<dyn ApduExchange>,
    interval: Duration,
    loggers: Loggers,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match channel.exchange(eth_app::get_app_configuration_apdu()).await {
                Ok(response) if response.is_success() => {
                    tracing::trace!(session = %session_id, "session refreshed");
                }
                Ok(response) => loggers.emit(
                    LogEntry::warn("session-refresher", "Device answered refresh with an error")
                        .field("session_id", &session_id)
                        .field("status", format!("0x{:04x}", response.status)),
                ),
                Err(e) => loggers.emit(
                    LogEntry::warn("session-refresher", "Refresh exchange failed")
                        .field("session_id", &session_id)
                        .field("error", e),
                ),
            }
        }
    })
}
