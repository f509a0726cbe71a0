//! Device Management Kit
//!
//! Owns the registered transports, the logger fan-out and the table of open
//! sessions. Signers talk to a device only through a session id, so once a
//! session is released every later exchange fails with `SessionNotFound`.

mod session;

pub use session::{SessionId, SessionRefresherOptions};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::stream::BoxStream;

use crate::error::{ConnectorError, ConnectorResult};
use crate::logging::{LogEntry, LoggerSubscriber};
use crate::transport::{
    Apdu, ApduExchange, ApduResponse, DiscoveredDevice, Transport, TransportIdentifier,
};
use session::{spawn_refresher, DeviceSession};

/// Shared list of logger subscribers
#[derive(Clone, Default)]
pub(crate) struct Loggers(Arc<Vec<Arc<dyn LoggerSubscriber>>>);

impl Loggers {
    pub fn emit(&self, entry: LogEntry) {
        for logger in self.0.iter() {
            logger.log(&entry);
        }
    }
}

/// Arguments of [`DeviceManagementKit::connect`]
#[derive(Debug, Clone)]
pub struct ConnectArgs {
    pub device: DiscoveredDevice,
    pub session_refresher_options: SessionRefresherOptions,
}

/// Summary of an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub device: DiscoveredDevice,
    pub refresher_enabled: bool,
}

#[derive(Default)]
pub struct DeviceManagementKitBuilder {
    transports: Vec<Arc<dyn Transport>>,
    loggers: Vec<Arc<dyn LoggerSubscriber>>,
}

impl DeviceManagementKitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn add_logger(mut self, logger: Arc<dyn LoggerSubscriber>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn build(self) -> DeviceManagementKit {
        let loggers = Loggers(Arc::new(self.loggers));
        let mut transports = HashMap::new();

        for transport in self.transports {
            let id = transport.identifier();
            if transports.insert(id, transport).is_some() {
                loggers.emit(
                    LogEntry::warn("dmk", "Transport registered twice, keeping the last one")
                        .field("transport", id),
                );
            }
        }

        loggers.emit(
            LogEntry::info("dmk", "Device management kit ready")
                .field("transports", transports.len()),
        );

        DeviceManagementKit {
            transports,
            loggers,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

pub struct DeviceManagementKit {
    transports: HashMap<TransportIdentifier, Arc<dyn Transport>>,
    loggers: Loggers,
    sessions: RwLock<HashMap<SessionId, DeviceSession>>,
}

impl DeviceManagementKit {
    pub fn transports(&self) -> Vec<TransportIdentifier> {
        self.transports.keys().copied().collect()
    }

    pub(crate) fn log(&self, entry: LogEntry) {
        self.loggers.emit(entry);
    }

    /// Stream of devices reachable through `transport`
    pub fn start_discovering(
        &self,
        transport: TransportIdentifier,
    ) -> ConnectorResult<BoxStream<'static, DiscoveredDevice>> {
        let registered = self.transports.get(&transport).ok_or_else(|| {
            ConnectorError::transport_not_found("Transport is not registered")
                .with_details(transport.to_string())
        })?;

        self.log(LogEntry::info("dmk", "Start discovering").field("transport", transport));
        Ok(registered.start_discovering())
    }

    /// Open a session on a discovered device
    pub async fn connect(&self, args: ConnectArgs) -> ConnectorResult<SessionId> {
        let ConnectArgs {
            device,
            session_refresher_options,
        } = args;

        let transport = self.transports.get(&device.transport).ok_or_else(|| {
            ConnectorError::transport_not_found("Transport is not registered")
                .with_details(device.transport.to_string())
        })?;

        let channel = transport.connect(&device).await.map_err(|e| {
            self.log(
                LogEntry::error("dmk", "Connection failed")
                    .field("device", &device.name)
                    .field("error", &e),
            );
            e
        })?;

        let session_id = SessionId::generate();
        let mut session = DeviceSession::new(device.clone(), Arc::clone(&channel));
        if !session_refresher_options.is_refresher_disabled {
            session = session.with_refresher(spawn_refresher(
                session_id.clone(),
                channel,
                session_refresher_options.polling_interval,
                self.loggers.clone(),
            ));
        }

        self.sessions
            .write()
            .map_err(|_| ConnectorError::internal("Session table lock poisoned"))?
            .insert(session_id.clone(), session);

        self.log(
            LogEntry::info("dmk", "Device connected")
                .field("device", &device.name)
                .field("session_id", &session_id)
                .field(
                    "refresher",
                    if session_refresher_options.is_refresher_disabled {
                        "disabled"
                    } else {
                        "enabled"
                    },
                ),
        );

        Ok(session_id)
    }

    /// Release a session; in-flight actions are not cancelled
    pub async fn disconnect(&self, session_id: &SessionId) -> ConnectorResult<()> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| ConnectorError::internal("Session table lock poisoned"))?
            .remove(session_id);

        match removed {
            Some(session) => {
                self.log(
                    LogEntry::info("dmk", "Device disconnected")
                        .field("device", &session.device.name)
                        .field("session_id", session_id)
                        .field(
                            "duration_ms",
                            (chrono::Utc::now() - session.connected_at).num_milliseconds(),
                        ),
                );
                Ok(())
            }
            None => Err(ConnectorError::session_not_found("Unknown session")
                .with_details(session_id.to_string())),
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|(id, session)| SessionInfo {
                        session_id: id.clone(),
                        device: session.device.clone(),
                        refresher_enabled: session.has_refresher(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn session_channel(&self, session_id: &SessionId) -> ConnectorResult<Arc<dyn ApduExchange>> {
        self.sessions
            .read()
            .map_err(|_| ConnectorError::internal("Session table lock poisoned"))?
            .get(session_id)
            .map(|session| Arc::clone(&session.channel))
            .ok_or_else(|| {
                ConnectorError::session_not_found("Unknown session")
                    .with_details(session_id.to_string())
            })
    }

    /// Exchange one APDU on an open session
    pub async fn send_apdu(
        &self,
        session_id: &SessionId,
        apdu: Apdu,
    ) -> ConnectorResult<ApduResponse> {
        let channel = self.session_channel(session_id)?;
        tracing::trace!(session = %session_id, ins = apdu.ins, "sending apdu");
        channel.exchange(apdu).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SIMULATOR_MNEMONIC;
    use crate::error::ErrorCode;
    use crate::logging::LogsExporterLogger;
    use crate::signer::eth_app;
    use crate::transport::SimulatorTransport;
    use futures::StreamExt;
    use std::time::Duration;

    fn kit() -> (DeviceManagementKit, Arc<LogsExporterLogger>, SimulatorTransport) {
        let exporter = Arc::new(LogsExporterLogger::new());
        let simulator = SimulatorTransport::new(DEFAULT_SIMULATOR_MNEMONIC).unwrap();
        let dmk = DeviceManagementKitBuilder::new()
            .add_transport(Arc::new(simulator.clone()))
            .add_logger(exporter.clone())
            .build();
        (dmk, exporter, simulator)
    }

    async fn first_device(dmk: &DeviceManagementKit) -> DiscoveredDevice {
        dmk.start_discovering(TransportIdentifier::Simulator)
            .unwrap()
            .next()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_transport() {
        let (dmk, _, _) = kit();
        let err = dmk
            .start_discovering(TransportIdentifier::Speculos)
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::TransportNotFound);
    }

    #[tokio::test]
    async fn test_connect_exchange_disconnect() {
        let (dmk, exporter, _) = kit();
        let device = first_device(&dmk).await;

        let session_id = dmk
            .connect(ConnectArgs {
                device,
                session_refresher_options: SessionRefresherOptions::disabled(),
            })
            .await
            .unwrap();

        let sessions = dmk.sessions();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].refresher_enabled);

        let response = dmk
            .send_apdu(&session_id, eth_app::get_app_configuration_apdu())
            .await
            .unwrap();
        assert!(response.is_success());

        dmk.disconnect(&session_id).await.unwrap();
        let err = dmk
            .send_apdu(&session_id, eth_app::get_app_configuration_apdu())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
        assert_eq!(
            dmk.disconnect(&session_id).await.unwrap_err().code,
            ErrorCode::SessionNotFound
        );

        let logs = exporter.export_logs();
        assert!(logs.iter().any(|l| l.contains("Device connected")));
        assert!(logs.iter().any(|l| l.contains("Device disconnected")));
        // session ids are never logged in full
        assert!(!logs.iter().any(|l| l.contains(session_id.as_str())));
    }

    #[tokio::test]
    async fn test_refresher_pings_until_disconnect() {
        let (dmk, _, simulator) = kit();
        let device = first_device(&dmk).await;

        let session_id = dmk
            .connect(ConnectArgs {
                device,
                session_refresher_options: SessionRefresherOptions {
                    is_refresher_disabled: false,
                    polling_interval: Duration::from_millis(20),
                },
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let pings = simulator.device().exchange_count();
        assert!(pings >= 3, "expected at least 3 pings, got {}", pings);

        dmk.disconnect(&session_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(simulator.device().exchange_count(), pings);
    }
}
