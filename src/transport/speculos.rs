//! Speculos emulator transport
//!
//! Speculos exposes the emulated device over REST: `POST /apdu` with
//! `{"data": "<hex>"}` answers `{"data": "<hex response + status word>"}`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Apdu, ApduExchange, ApduResponse, DiscoveredDevice, Transport, TransportIdentifier};
use crate::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Serialize, Deserialize)]
struct ApduPayload {
    data: String,
}

/// Transport talking to a single Speculos instance
#[derive(Debug, Clone)]
pub struct SpeculosTransport {
    url: String,
    client: Client,
}

impl SpeculosTransport {
    pub fn new(url: impl Into<String>) -> ConnectorResult<Self> {
        let url = url.into();
        url::Url::parse(&url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConnectorError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for SpeculosTransport {
    fn identifier(&self) -> TransportIdentifier {
        TransportIdentifier::Speculos
    }

    fn start_discovering(&self) -> BoxStream<'static, DiscoveredDevice> {
        let device = DiscoveredDevice {
            id: self.url.clone(),
            name: "Speculos".to_string(),
            transport: TransportIdentifier::Speculos,
        };
        stream::iter(vec![device]).boxed()
    }

    fn connect(
        &self,
        device: &DiscoveredDevice,
    ) -> BoxFuture<'_, ConnectorResult<Arc<dyn ApduExchange>>> {
        let device_id = device.id.clone();
        Box::pin(async move {
            if device_id != self.url {
                return Err(ConnectorError::connection_failed("Unknown Speculos device")
                    .with_details(device_id));
            }
            let channel: Arc<dyn ApduExchange> = Arc::new(SpeculosChannel {
                endpoint: format!("{}/apdu", self.url),
                client: self.client.clone(),
            });
            Ok(channel)
        })
    }
}

struct SpeculosChannel {
    endpoint: String,
    client: Client,
}

impl ApduExchange for SpeculosChannel {
    fn exchange(&self, apdu: Apdu) -> BoxFuture<'_, ConnectorResult<ApduResponse>> {
        Box::pin(async move {
            let body = ApduPayload {
                data: hex::encode(apdu.to_bytes()),
            };
            tracing::trace!(ins = apdu.ins, "speculos exchange");

            let response = self.client.post(&self.endpoint).json(&body).send().await?;
            if !response.status().is_success() {
                return Err(ConnectorError::transport(format!(
                    "Speculos returned HTTP {}",
                    response.status()
                )));
            }

            let payload: ApduPayload = response.json().await?;
            ApduResponse::from_bytes(&hex::decode(payload.data.trim())?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discovers_its_url() {
        let transport = SpeculosTransport::new("http://127.0.0.1:5000/").unwrap();
        let devices: Vec<_> = transport.start_discovering().collect().await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "http://127.0.0.1:5000");
        assert_eq!(devices[0].transport, TransportIdentifier::Speculos);
    }

    #[tokio::test]
    async fn test_connect_rejects_foreign_device() {
        let transport = SpeculosTransport::new("http://127.0.0.1:5000").unwrap();
        let device = DiscoveredDevice {
            id: "http://10.0.0.1:5000".to_string(),
            name: "Speculos".to_string(),
            transport: TransportIdentifier::Speculos,
        };
        assert!(transport.connect(&device).await.is_err());
    }

    #[test]
    fn test_invalid_url() {
        assert!(SpeculosTransport::new("not a url").is_err());
    }

    async fn channel(url: &str) -> Arc<dyn ApduExchange> {
        let transport = SpeculosTransport::new(url).unwrap();
        let device = transport.start_discovering().next().await.unwrap();
        transport.connect(&device).await.unwrap()
    }

    #[tokio::test]
    async fn test_exchange_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/apdu")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "data": "e006000000"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": "01010a039000"}"#)
            .expect(1)
            .create_async()
            .await;

        let response = channel(&server.url())
            .await
            .exchange(Apdu::new(0xe0, 0x06, 0x00, 0x00))
            .await
            .unwrap();

        assert_eq!(response.status, 0x9000);
        assert_eq!(response.data, vec![0x01, 0x01, 0x0a, 0x03]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_keeps_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/apdu")
            .with_status(200)
            .with_body(r#"{"data": "6985"}"#)
            .create_async()
            .await;

        let response = channel(&server.url())
            .await
            .exchange(Apdu::new(0xe0, 0x08, 0x00, 0x00))
            .await
            .unwrap();

        assert!(response.data.is_empty());
        assert_eq!(response.status, 0x6985);
    }

    #[tokio::test]
    async fn test_exchange_http_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/apdu")
            .with_status(500)
            .create_async()
            .await;

        let result = channel(&server.url())
            .await
            .exchange(Apdu::new(0xe0, 0x06, 0x00, 0x00))
            .await;

        assert_eq!(
            result.err().map(|e| e.code),
            Some(crate::error::ErrorCode::TransportError)
        );
    }
}
