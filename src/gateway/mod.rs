//! Semtech gateway back-end: owns the UDP socket, speaks the ack
//! protocol, emits uplink frames and transmits downlink frames.

pub mod protocol;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::lorawan::{Eui64, PhyPayload};
use crate::packet::{DataRate, RxInfo, RxPacket, TxPacket};
use crate::store::{Gateway, UDP_ADDR_CONFIG_KEY};
use protocol::{
    DatR, PacketType, PullAckPacket, PullDataPacket, PullRespPacket, PullRespPayload,
    PushAckPacket, PushDataPacket, Rxpk, Stat, Txpk,
};

// max udp payload size
const READ_BUFFER_SIZE: usize = 65_507;
const CHANNEL_SIZE: usize = 256;

struct UdpPacket {
    data: Vec<u8>,
    addr: SocketAddr,
}

/// The Semtech UDP endpoint. Two long-lived loops share the socket: the
/// read loop spawns a task per datagram, the send loop drains the
/// outbound queue (single writer).
pub struct GatewayBackend {
    socket: Arc<UdpSocket>,
    send_tx: Mutex<Option<mpsc::Sender<UdpPacket>>>,
    client: OnceLock<Arc<Client>>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayBackend {
    /// Bind the UDP socket on all interfaces and start both loops.
    /// Returns the backend and the channel on which received uplink
    /// frames are emitted.
    pub async fn bind(port: u16) -> Result<(Arc<Self>, mpsc::Receiver<RxPacket>)> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", port)).await?);
        info!(addr = %socket.local_addr()?, "gateway udp listener started");

        let (rx_tx, rx_rx) = mpsc::channel(CHANNEL_SIZE);
        let (send_tx, send_rx) = mpsc::channel(CHANNEL_SIZE);

        let backend = Arc::new(Self {
            socket: socket.clone(),
            send_tx: Mutex::new(Some(send_tx)),
            client: OnceLock::new(),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let reader = tokio::spawn(Self::read_loop(backend.clone(), rx_tx));
        let writer = tokio::spawn(Self::send_loop(
            socket,
            send_rx,
            backend.closed.clone(),
        ));
        backend.tasks.lock().unwrap().extend([reader, writer]);

        Ok((backend, rx_rx))
    }

    /// Inject the client after construction (see [`Client::new`]).
    pub fn set_client(&self, client: Arc<Client>) {
        let _ = self.client.set(client);
    }

    /// The socket's actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Route a downlink frame to its gateway as a PULL_RESP.
    pub async fn send(&self, packet: TxPacket) -> Result<()> {
        let client = self
            .client
            .get()
            .ok_or_else(|| Error::Storage("gateway backend is not wired to a client".into()))?;

        let gw = match client.gateways().get(packet.tx_info.mac).await {
            Ok(gw) => gw,
            Err(Error::ObjectDoesNotExist) => return Err(Error::GatewayNotRegistered),
            Err(e) => return Err(e),
        };
        let addr: SocketAddr = gw
            .config
            .get(UDP_ADDR_CONFIG_KEY)
            .ok_or(Error::GatewayNotRegistered)?
            .parse()
            .map_err(|e| Error::Storage(format!("invalid gateway udp_addr: {}", e)))?;

        let pull_resp = PullRespPacket {
            random_token: 0,
            payload: PullRespPayload {
                txpk: txpk_from_tx_packet(&packet),
            },
        };
        self.enqueue(pull_resp.to_bytes()?, addr).await
    }

    /// Stop both loops, close the socket and wait for them to finish.
    /// Errors observed while closing are suppressed.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        // dropping the sender lets the send loop drain and exit
        self.send_tx.lock().unwrap().take();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    async fn enqueue(&self, data: Vec<u8>, addr: SocketAddr) -> Result<()> {
        let tx = self
            .send_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::NotConnected.into()))?;
        tx.send(UdpPacket { data, addr })
            .await
            .map_err(|_| Error::Io(std::io::ErrorKind::NotConnected.into()))
    }

    async fn read_loop(backend: Arc<Self>, rx_tx: mpsc::Sender<RxPacket>) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let shutdown = backend.shutdown.clone();
        // a single registration, so a wake between iterations is not lost
        let notified = shutdown.notified();
        tokio::pin!(notified);
        loop {
            tokio::select! {
                _ = &mut notified => break,
                res = backend.socket.recv_from(&mut buf) => {
                    let (len, addr) = match res {
                        Ok(ok) => ok,
                        Err(e) => {
                            if !backend.closed.load(Ordering::SeqCst) {
                                error!("gateway udp read error: {}", e);
                            }
                            break;
                        }
                    };
                    let data = buf[..len].to_vec();
                    let backend = backend.clone();
                    let rx_tx = rx_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = backend.handle_datagram(addr, &data, &rx_tx).await {
                            error!(
                                addr = %addr,
                                udp_data_base64 = %base64::engine::general_purpose::STANDARD.encode(&data),
                                "could not handle packet: {}", e
                            );
                        }
                    });
                }
            }
        }
    }

    async fn send_loop(
        socket: Arc<UdpSocket>,
        mut send_rx: mpsc::Receiver<UdpPacket>,
        closed: Arc<AtomicBool>,
    ) {
        while let Some(p) = send_rx.recv().await {
            if let Ok(pt) = protocol::packet_type(&p.data) {
                info!(addr = %p.addr, r#type = %pt, "outgoing gateway packet");
            }
            if let Err(e) = socket.send_to(&p.data, p.addr).await {
                if !closed.load(Ordering::SeqCst) {
                    error!(addr = %p.addr, "gateway udp write error: {}", e);
                }
                break;
            }
        }
    }

    async fn handle_datagram(
        &self,
        addr: SocketAddr,
        data: &[u8],
        rx_tx: &mpsc::Sender<RxPacket>,
    ) -> Result<()> {
        let pt = protocol::packet_type(data)?;
        info!(addr = %addr, r#type = %pt, "incoming gateway packet");

        match pt {
            PacketType::PushData => self.handle_push_data(addr, data, rx_tx).await,
            PacketType::PullData => self.handle_pull_data(addr, data).await,
            _ => Err(Error::WireFormat(format!(
                "unexpected upstream packet type: {}",
                pt
            ))),
        }
    }

    async fn handle_pull_data(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        let p = PullDataPacket::from_bytes(data)?;
        let ack = PullAckPacket {
            random_token: p.random_token,
        };
        self.enqueue(ack.to_bytes(), addr).await?;
        self.register_peer(addr, p.gateway_mac).await
    }

    async fn handle_push_data(
        &self,
        addr: SocketAddr,
        data: &[u8],
        rx_tx: &mpsc::Sender<RxPacket>,
    ) -> Result<()> {
        let p = PushDataPacket::from_bytes(data)?;

        // the protocol wants a prompt ack, before any processing
        let ack = PushAckPacket {
            random_token: p.random_token,
        };
        self.enqueue(ack.to_bytes(), addr).await?;

        if let Some(stat) = &p.payload.stat {
            self.update_stat(addr, p.gateway_mac, stat).await?;
        }

        for rxpk in &p.payload.rxpk {
            let packet = match rx_packet_from_rxpk(p.gateway_mac, rxpk) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(addr = %addr, mac = %p.gateway_mac, "could not decode rxpk: {}", e);
                    continue;
                }
            };
            if packet.rx_info.crc_status != 1 {
                warn!(
                    addr = %addr,
                    mac = %p.gateway_mac,
                    "dropping packet with invalid CRC: {}", packet.rx_info.crc_status
                );
                continue;
            }
            rx_tx
                .send(packet)
                .await
                .map_err(|_| Error::Io(std::io::ErrorKind::NotConnected.into()))?;
        }
        Ok(())
    }

    async fn update_stat(&self, addr: SocketAddr, mac: Eui64, stat: &Stat) -> Result<()> {
        let client = self
            .client
            .get()
            .ok_or_else(|| Error::Storage("gateway backend is not wired to a client".into()))?;
        info!(addr = %addr, mac = %mac, "storing gateway stats");
        client
            .gateways()
            .upsert(&gateway_from_stat(addr, mac, stat))
            .await
    }

    /// Record the peer address seen on PULL_DATA so downlinks can be
    /// routed before the gateway's first stat block arrives.
    async fn register_peer(&self, addr: SocketAddr, mac: Eui64) -> Result<()> {
        let client = self
            .client
            .get()
            .ok_or_else(|| Error::Storage("gateway backend is not wired to a client".into()))?;

        let gateways = client.gateways();
        let mut gw = match gateways.get(mac).await {
            Ok(gw) => gw,
            Err(Error::ObjectDoesNotExist) => gateway_from_stat(addr, mac, &Stat::default()),
            Err(e) => return Err(e),
        };
        gw.updated_at = Utc::now();
        gw.config
            .insert(UDP_ADDR_CONFIG_KEY.to_string(), addr.to_string());
        gateways.upsert(&gw).await
    }
}

fn gateway_from_stat(addr: SocketAddr, mac: Eui64, stat: &Stat) -> Gateway {
    Gateway {
        mac,
        updated_at: stat
            .time
            .as_deref()
            .and_then(parse_stat_time)
            .unwrap_or_else(Utc::now),
        latitude: stat.lati,
        longitude: stat.long,
        altitude: stat.alti,
        rx_packets_received: stat.rxnb,
        rx_packets_received_ok: stat.rxok,
        rx_packets_forwarded: stat.rxfw,
        ack_rate: stat.ackr,
        tx_packets_received: stat.dwnb,
        config: std::collections::HashMap::from([(
            UDP_ADDR_CONFIG_KEY.to_string(),
            addr.to_string(),
        )]),
    }
}

// "2014-01-12 08:59:28 GMT", the packet forwarder's expanded time format
fn parse_stat_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

fn rx_packet_from_rxpk(mac: Eui64, rxpk: &Rxpk) -> Result<RxPacket> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&rxpk.data)
        .map_err(|e| Error::WireFormat(format!("could not base64 decode rxpk data: {}", e)))?;
    let phy_payload = PhyPayload::from_bytes(&bytes)?;

    let data_rate = match &rxpk.datr {
        DatR::Lora(s) => DataRate::lora(s),
        DatR::Fsk(bitrate) => DataRate {
            lora: String::new(),
            fsk: *bitrate,
        },
    };

    Ok(RxPacket {
        phy_payload,
        rx_info: RxInfo {
            mac,
            time: rxpk.time.clone(),
            timestamp: rxpk.tmst,
            frequency: rxpk.freq,
            channel: rxpk.chan as u32,
            rf_chain: rxpk.rfch as u32,
            crc_status: rxpk.stat,
            modulation: rxpk.modu.clone(),
            data_rate,
            coding_rate: rxpk.codr.clone(),
            rssi: rxpk.rssi,
            lora_snr: rxpk.lsnr,
            size: rxpk.size,
        },
    })
}

fn txpk_from_tx_packet(packet: &TxPacket) -> Txpk {
    let bytes = packet.phy_payload.to_bytes();
    let modulation = packet.tx_info.data_rate.modulation();

    Txpk {
        imme: packet.tx_info.immediately,
        tmst: packet.tx_info.timestamp,
        freq: packet.tx_info.frequency,
        rfch: packet.tx_info.rf_chain,
        powe: packet.tx_info.power,
        modu: modulation.to_string(),
        datr: if modulation == "LORA" {
            DatR::Lora(packet.tx_info.data_rate.lora.clone())
        } else {
            DatR::Fsk(packet.tx_info.data_rate.fsk)
        },
        codr: packet.tx_info.code_rate.clone(),
        fdev: (modulation == "FSK").then_some(packet.tx_info.frequency_deviation),
        // LoRaWAN class-A downlinks are received with inverted polarity
        ipol: modulation == "LORA",
        size: bytes.len() as u16,
        ncrc: packet.tx_info.disable_crc.then_some(true),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::DummyApplicationBackend;
    use crate::storage::MemoryStorage;

    async fn test_backend() -> (Arc<Client>, Arc<GatewayBackend>, mpsc::Receiver<RxPacket>) {
        let (backend, rx) = GatewayBackend::bind(0).await.unwrap();
        let client = Client::new(
            Arc::new(MemoryStorage::new()),
            backend.clone(),
            Arc::new(DummyApplicationBackend::new()),
        );
        (client, backend, rx)
    }

    async fn gateway_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    fn server_addr(backend: &GatewayBackend) -> SocketAddr {
        let port = backend.local_addr().unwrap().port();
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    async fn recv_with_timeout(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .expect("no datagram within 1s")
            .unwrap();
        buf[..len].to_vec()
    }

    fn push_data_bytes(token: u16, mac: [u8; 8], json: &str) -> Vec<u8> {
        let mut bytes = vec![protocol::PROTOCOL_VERSION];
        bytes.extend_from_slice(&token.to_be_bytes());
        bytes.push(PacketType::PushData as u8);
        bytes.extend_from_slice(&mac);
        bytes.extend_from_slice(json.as_bytes());
        bytes
    }

    #[tokio::test]
    async fn pull_data_is_acked_and_registers_peer() {
        let (client, backend, _rx) = test_backend().await;
        let socket = gateway_socket().await;

        let pull = PullDataPacket {
            random_token: 0x04d2,
            gateway_mac: Eui64([1, 2, 3, 4, 5, 6, 7, 8]),
        };
        socket
            .send_to(&pull.to_bytes(), server_addr(&backend))
            .await
            .unwrap();

        let ack = recv_with_timeout(&socket).await;
        assert_eq!(ack, vec![0x02, 0x04, 0xd2, 0x04]);

        // peer address is recorded for downlink routing
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            match client.gateways().get(Eui64([1, 2, 3, 4, 5, 6, 7, 8])).await {
                Ok(gw) => {
                    assert_eq!(
                        gw.config.get(UDP_ADDR_CONFIG_KEY).map(String::as_str),
                        Some(socket.local_addr().unwrap().to_string().as_str())
                    );
                    break;
                }
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("gateway never registered: {}", e),
            }
        }
    }

    #[tokio::test]
    async fn push_data_with_stat_is_acked_and_upserted() {
        let (client, backend, _rx) = test_backend().await;
        let socket = gateway_socket().await;
        let mac = [1, 2, 3, 4, 5, 6, 7, 8];

        let json = r#"{"stat":{"lati":1.234,"long":2.123,"alti":123,"rxnb":1,"rxok":2,"rxfw":3,"ackr":33.3,"dwnb":4}}"#;
        socket
            .send_to(&push_data_bytes(0x1234, mac, json), server_addr(&backend))
            .await
            .unwrap();

        let ack = recv_with_timeout(&socket).await;
        assert_eq!(ack, vec![0x02, 0x12, 0x34, 0x01]);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let gw = loop {
            match client.gateways().get(Eui64(mac)).await {
                Ok(gw) => break gw,
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("gateway never upserted: {}", e),
            }
        };
        assert_eq!(gw.latitude, 1.234);
        assert_eq!(gw.longitude, 2.123);
        assert_eq!(gw.altitude, 123);
        assert_eq!(gw.rx_packets_received, 1);
        assert_eq!(gw.rx_packets_received_ok, 2);
        assert_eq!(gw.rx_packets_forwarded, 3);
        assert_eq!(gw.ack_rate, 33.3);
        assert_eq!(gw.tx_packets_received, 4);
        assert_eq!(
            gw.config.get(UDP_ADDR_CONFIG_KEY).map(String::as_str),
            Some(socket.local_addr().unwrap().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn push_data_rxpk_is_emitted_on_the_uplink_channel() {
        let (_client, backend, mut rx) = test_backend().await;
        let socket = gateway_socket().await;
        let mac = [1, 2, 3, 4, 5, 6, 7, 8];

        let phy = vec![
            0x40, 0x01, 0x01, 0x01, 0x01, 0x00, 0x0a, 0x00, 0x01, 0xaa, 0xbb, 0x01, 0x02, 0x03,
            0x04,
        ];
        let data = base64::engine::general_purpose::STANDARD.encode(&phy);
        let json = format!(
            r#"{{"rxpk":[{{"tmst":708016819,"chan":2,"rfch":1,"freq":868.5,"stat":1,"modu":"LORA","datr":"SF7BW125","codr":"4/5","rssi":-57,"lsnr":7.8,"size":15,"data":"{}"}}]}}"#,
            data
        );
        socket
            .send_to(&push_data_bytes(1, mac, &json), server_addr(&backend))
            .await
            .unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no uplink within 1s")
            .unwrap();
        assert_eq!(packet.rx_info.mac, Eui64(mac));
        assert_eq!(packet.rx_info.rssi, -57);
        assert_eq!(packet.phy_payload.to_bytes(), phy);
    }

    #[tokio::test]
    async fn rxpk_with_bad_crc_is_dropped() {
        let (_client, backend, mut rx) = test_backend().await;
        let socket = gateway_socket().await;

        let phy = vec![
            0x40, 0x01, 0x01, 0x01, 0x01, 0x00, 0x0a, 0x00, 0x01, 0xaa, 0x01, 0x02, 0x03, 0x04,
        ];
        let data = base64::engine::general_purpose::STANDARD.encode(&phy);
        let json = format!(
            r#"{{"rxpk":[{{"tmst":1,"freq":868.5,"stat":-1,"modu":"LORA","datr":"SF7BW125","rssi":-57,"size":14,"data":"{}"}}]}}"#,
            data
        );
        socket
            .send_to(
                &push_data_bytes(1, [1; 8], &json),
                server_addr(&backend),
            )
            .await
            .unwrap();

        // the ack still goes out, but nothing reaches the uplink channel
        let _ack = recv_with_timeout(&socket).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn send_routes_pull_resp_to_registered_peer() {
        let (client, backend, _rx) = test_backend().await;
        let socket = gateway_socket().await;
        let mac = Eui64([1, 2, 3, 4, 5, 6, 7, 8]);

        // register the gateway's peer address via PULL_DATA
        let pull = PullDataPacket {
            random_token: 7,
            gateway_mac: mac,
        };
        socket
            .send_to(&pull.to_bytes(), server_addr(&backend))
            .await
            .unwrap();
        let _ack = recv_with_timeout(&socket).await;

        // wait for the upsert to land
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while client.gateways().get(mac).await.is_err() {
            assert!(tokio::time::Instant::now() < deadline, "peer never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let tx_packet = TxPacket {
            phy_payload: PhyPayload::from_bytes(&[
                0x60, 0x01, 0x01, 0x01, 0x01, 0x00, 0x01, 0x00, 0x01, 0xaa, 0x00, 0x00, 0x00,
                0x00,
            ])
            .unwrap(),
            tx_info: crate::packet::TxInfo {
                mac,
                immediately: true,
                timestamp: None,
                frequency: 868.1,
                rf_chain: 0,
                power: 14,
                data_rate: DataRate::lora("SF12BW125"),
                code_rate: "4/5".into(),
                frequency_deviation: 0,
                disable_crc: false,
            },
        };
        backend.send(tx_packet).await.unwrap();

        let resp = recv_with_timeout(&socket).await;
        let pull_resp = PullRespPacket::from_bytes(&resp).unwrap();
        assert_eq!(pull_resp.payload.txpk.modu, "LORA");
        assert!(pull_resp.payload.txpk.ipol);
        assert!(pull_resp.payload.txpk.imme);
    }

    #[tokio::test]
    async fn send_to_unknown_gateway_fails() {
        let (_client, backend, _rx) = test_backend().await;
        let tx_packet = TxPacket {
            phy_payload: PhyPayload::from_bytes(&[
                0x60, 0x01, 0x01, 0x01, 0x01, 0x00, 0x01, 0x00, 0x01, 0xaa, 0x00, 0x00, 0x00,
                0x00,
            ])
            .unwrap(),
            tx_info: crate::packet::TxInfo {
                mac: Eui64([9; 8]),
                immediately: true,
                timestamp: None,
                frequency: 868.1,
                rf_chain: 0,
                power: 14,
                data_rate: DataRate::lora("SF12BW125"),
                code_rate: "4/5".into(),
                frequency_deviation: 0,
                disable_crc: false,
            },
        };
        assert!(matches!(
            backend.send(tx_packet).await,
            Err(Error::GatewayNotRegistered)
        ));
    }

    #[tokio::test]
    async fn close_stops_both_loops() {
        let (_client, backend, _rx) = test_backend().await;
        tokio::time::timeout(Duration::from_secs(1), backend.close())
            .await
            .expect("close did not finish")
            .unwrap();
    }

    #[test]
    fn stat_time_parses_expanded_format() {
        let t = parse_stat_time("2016-01-01 12:00:00 GMT").unwrap();
        assert_eq!(t.to_rfc3339(), "2016-01-01T12:00:00+00:00");
        assert!(parse_stat_time("garbage").is_none());
    }
}
