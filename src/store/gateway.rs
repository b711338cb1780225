//! Gateway entity: last-seen state of a packet forwarder, upserted from
//! its periodic stat blocks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lorawan::Eui64;
use crate::storage::Storage;

/// Config key under which the gateway's most recent UDP peer address is
/// recorded. Downlinks are routed to this address.
pub const UDP_ADDR_CONFIG_KEY: &str = "udp_addr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub mac: Eui64,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    /// Radio packets received (rxnb).
    #[serde(rename = "rxPacketsReceived")]
    pub rx_packets_received: u32,
    /// Radio packets with a valid CRC (rxok).
    #[serde(rename = "rxPacketsReceivedOK")]
    pub rx_packets_received_ok: u32,
    /// Packets forwarded upstream (rxfw).
    #[serde(rename = "rxPacketsForwarded")]
    pub rx_packets_forwarded: u32,
    /// Percentage of upstream datagrams that were acknowledged (ackr).
    #[serde(rename = "ackRate")]
    pub ack_rate: f64,
    /// Downlink datagrams received (dwnb).
    #[serde(rename = "txPacketsReceived")]
    pub tx_packets_received: u32,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

#[derive(Clone)]
pub struct GatewayStore {
    storage: Arc<dyn Storage>,
}

impl GatewayStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(mac: Eui64) -> String {
        format!("gateway:{}", mac)
    }

    /// Create-or-replace; every stat block observed rewrites the record.
    pub async fn upsert(&self, gw: &Gateway) -> Result<()> {
        self.storage
            .set(&Self::key(gw.mac), serde_json::to_string(gw)?)
            .await
    }

    pub async fn get(&self, mac: Eui64) -> Result<Gateway> {
        let raw = self
            .storage
            .get(&Self::key(mac))
            .await?
            .ok_or(Error::ObjectDoesNotExist)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn gateway(lat: f64) -> Gateway {
        Gateway {
            mac: Eui64([1, 2, 3, 4, 5, 6, 7, 8]),
            updated_at: Utc::now(),
            latitude: lat,
            longitude: 2.123,
            altitude: 123,
            rx_packets_received: 1,
            rx_packets_received_ok: 2,
            rx_packets_forwarded: 3,
            ack_rate: 33.3,
            tx_packets_received: 4,
            config: HashMap::from([(
                UDP_ADDR_CONFIG_KEY.to_string(),
                "127.0.0.1:1700".to_string(),
            )]),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_previous_state() {
        let s = GatewayStore::new(Arc::new(MemoryStorage::new()));
        s.upsert(&gateway(1.0)).await.unwrap();
        s.upsert(&gateway(2.0)).await.unwrap();

        let got = s.get(Eui64([1, 2, 3, 4, 5, 6, 7, 8])).await.unwrap();
        assert_eq!(got.latitude, 2.0);
        assert_eq!(
            got.config.get(UDP_ADDR_CONFIG_KEY).map(String::as_str),
            Some("127.0.0.1:1700")
        );
    }

    #[tokio::test]
    async fn get_unknown_gateway_fails() {
        let s = GatewayStore::new(Arc::new(MemoryStorage::new()));
        assert!(matches!(
            s.get(Eui64([9; 8])).await,
            Err(Error::ObjectDoesNotExist)
        ));
    }
}
