//! Downlink pump: forwards application-emitted TXPackets to the gateway
//! back-end for over-the-air transmission.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::client::Client;
use crate::packet::TxPacket;

/// Consume the application back-end's downlink channel until it closes.
/// Send failures affect only the frame at hand.
pub async fn run_downlink_dispatcher(client: Arc<Client>, mut rx: mpsc::Receiver<TxPacket>) {
    while let Some(packet) = rx.recv().await {
        let mac = packet.tx_info.mac;
        if let Err(e) = client.gateway_backend().send(packet).await {
            error!(mac = %mac, "error sending downlink packet: {}", e);
        }
    }
    info!("downlink channel closed, dispatcher stopping");
}
