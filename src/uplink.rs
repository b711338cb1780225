//! Uplink pipeline: from a collected group of gateway observations to a
//! delivered application payload.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::lorawan::crypto::{self, Direction};
use crate::packet::RxPacket;

/// Consume the gateway back-end's receive channel. Every packet gets its
/// own task: it joins (or opens) the collection window for its
/// transmission and, when it is the first observer, runs the processing
/// pipeline on the collected group.
pub async fn run_uplink_dispatcher(client: Arc<Client>, mut rx: mpsc::Receiver<RxPacket>) {
    while let Some(packet) = rx.recv().await {
        let client = client.clone();
        tokio::spawn(async move {
            let inner = client.clone();
            let result = client
                .collector()
                .collect_and_call_once(packet, move |packets| async move {
                    handle_collected_packets(&inner, packets).await
                })
                .await;
            if let Err(e) = result {
                error!("error processing uplink: {}", e);
            }
        });
    }
    info!("uplink channel closed, dispatcher stopping");
}

/// Process one unique transmission, observed by one or more gateways.
/// The group arrives sorted best-signal-first.
pub async fn handle_collected_packets(client: &Arc<Client>, packets: Vec<RxPacket>) -> Result<()> {
    let first = packets.first().ok_or(Error::EmptyCollection)?;
    let mtype = first.phy_payload.mhdr.mtype;

    let macs: Vec<String> = packets
        .iter()
        .map(|p| p.rx_info.mac.to_string())
        .collect();
    info!(
        gw_count = packets.len(),
        gw_macs = %macs.join(", "),
        mtype = %mtype,
        "packet(s) collected"
    );

    match mtype {
        crate::lorawan::MType::JoinRequest => {
            // OTAA is deferred; see the non-goals
            info!("join request received, ignoring");
            Ok(())
        }
        m if m.is_data_up() => handle_data_up_packets(client, packets).await,
        m => {
            warn!(mtype = %m, "unknown MType received");
            Err(Error::UnknownMType(m))
        }
    }
}

async fn handle_data_up_packets(client: &Arc<Client>, mut packets: Vec<RxPacket>) -> Result<()> {
    let first = match packets.first_mut() {
        Some(first) => first,
        None => return Err(Error::EmptyCollection),
    };

    let (dev_addr, wire_fcnt) = {
        let mac = first
            .phy_payload
            .mac_payload()
            .ok_or_else(|| Error::WireFormat("expected a data MACPayload".into()))?;
        (mac.fhdr.dev_addr, mac.fhdr.fcnt)
    };

    let mut session = match client.node_sessions().get(dev_addr).await {
        Ok(session) => session,
        Err(Error::ObjectDoesNotExist) => return Err(Error::NoSession(dev_addr)),
        Err(e) => return Err(e),
    };

    // lift the 16 on-air bits to the full 32-bit counter
    let full_fcnt = match session.validate_and_get_full_fcnt_up(wire_fcnt) {
        Some(fcnt) => fcnt,
        None => {
            warn!(
                packet_fcnt = wire_fcnt,
                server_fcnt = session.fcnt_up,
                "invalid FCnt"
            );
            return Err(Error::InvalidFCnt {
                packet: wire_fcnt,
                server: session.fcnt_up,
            });
        }
    };

    {
        let mac = first
            .phy_payload
            .mac_payload_mut()
            .ok_or_else(|| Error::WireFormat("expected a data MACPayload".into()))?;
        mac.fhdr.fcnt = full_fcnt;
    }

    if !first
        .phy_payload
        .verify_uplink_mic(&session.nwk_s_key, full_fcnt)?
    {
        warn!(dev_addr = %dev_addr, "invalid MIC");
        return Err(Error::InvalidMic);
    }

    let fport = {
        let mac = first
            .phy_payload
            .mac_payload_mut()
            .ok_or_else(|| Error::WireFormat("expected a data MACPayload".into()))?;
        let fport = mac.fport.unwrap_or(0);
        // FPort 0 carries MAC commands encrypted under the network key
        let key = if fport == 0 {
            session.nwk_s_key
        } else {
            session.app_s_key
        };
        crypto::decrypt_frm_payload(
            &key,
            Direction::Up,
            dev_addr,
            full_fcnt,
            &mut mac.frm_payload,
        );
        fport
    };

    if fport == 0 {
        // TODO: process the decrypted MAC commands
        warn!(dev_addr = %dev_addr, "MAC commands on FPort 0 are not implemented, dropping");
        return Ok(());
    }

    let node = client.nodes().get(session.dev_eui).await?;
    // resolve the application up-front so a missing record surfaces here
    client.applications().get(node.app_eui).await?;

    client
        .application_backend()
        .send(node.app_eui, &packets)
        .await?;

    // only a fully delivered uplink advances the counter, so a transient
    // application failure leaves the frame retryable
    session.fcnt_up = full_fcnt.wrapping_add(1);
    client.node_sessions().update(&session).await?;
    info!(
        dev_addr = %dev_addr,
        dev_eui = %session.dev_eui,
        fcnt_up = session.fcnt_up,
        "frame counter advanced"
    );

    Ok(())
}
