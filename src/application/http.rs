//! HTTP application back-end: POSTs decrypted uplink payloads to the URL
//! configured on the application.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::ApplicationBackend;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::lorawan::Eui64;
use crate::packet::{RxPacket, TxPacket};

/// Documented config key; `callback_url` is accepted as a read alias for
/// records written by older tooling.
const CALLBACK_URL_KEY: &str = "callbackURL";
const CALLBACK_URL_ALIAS: &str = "callback_url";

/// Body POSTed to the application's callback URL.
#[derive(Debug, Serialize)]
struct RxPayload {
    #[serde(rename = "timeReceived")]
    time_received: String,
    #[serde(rename = "gatewayCount")]
    gateway_count: usize,
    port: u8,
    /// Base64 of the decrypted FRMPayload.
    payload: String,
}

pub struct HttpApplicationBackend {
    client: OnceLock<Arc<Client>>,
    http: reqwest::Client,
    downlink_tx: mpsc::Sender<TxPacket>,
}

impl HttpApplicationBackend {
    /// Build the back-end together with the receiving half of its downlink
    /// channel; the caller pumps that channel into the gateway back-end.
    pub fn new() -> (Self, mpsc::Receiver<TxPacket>) {
        let (downlink_tx, downlink_rx) = mpsc::channel(256);
        (
            Self {
                client: OnceLock::new(),
                http: reqwest::Client::new(),
                downlink_tx,
            },
            downlink_rx,
        )
    }

    /// Handle for feeding downlink frames into the back-end's channel.
    pub fn downlink_sender(&self) -> mpsc::Sender<TxPacket> {
        self.downlink_tx.clone()
    }

    fn client(&self) -> Result<&Arc<Client>> {
        self.client
            .get()
            .ok_or_else(|| Error::Application("backend is not wired to a client".into()))
    }
}

#[async_trait]
impl ApplicationBackend for HttpApplicationBackend {
    fn set_client(&self, client: Arc<Client>) {
        let _ = self.client.set(client);
    }

    async fn send(&self, app_eui: Eui64, packets: &[RxPacket]) -> Result<()> {
        let app = self.client()?.applications().get(app_eui).await?;
        let url = app
            .config
            .get(CALLBACK_URL_KEY)
            .or_else(|| app.config.get(CALLBACK_URL_ALIAS))
            .ok_or_else(|| {
                Error::Application("application config does not contain callbackURL".into())
            })?;

        let first = packets
            .first()
            .ok_or_else(|| Error::Application("packets should have length > 0".into()))?;
        let mac = first
            .phy_payload
            .mac_payload()
            .ok_or_else(|| Error::Application("expected a data MACPayload".into()))?;

        let body = RxPayload {
            time_received: first
                .rx_info
                .time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            gateway_count: packets.len(),
            port: mac.fport.unwrap_or(0),
            payload: base64::engine::general_purpose::STANDARD.encode(&mac.frm_payload),
        };

        debug!(app_eui = %app_eui, url = %url, "posting uplink payload");
        let resp = self
            .http
            .post(url.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Application(e.to_string()))?;

        match resp.status().as_u16() {
            200 | 201 => Ok(()),
            status => Err(Error::Application(format!(
                "expected 200 or 201 response code, got: {}",
                status
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
