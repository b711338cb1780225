//! Gateway simulator.
//!
//! Simulates a LoRa gateway speaking the Semtech UDP packet-forwarder
//! protocol at a running lorahub server. Useful for testing without
//! hardware: sends a PULL_DATA, a stat block and a couple of uplink
//! frames, and reports the acks it gets back.
//!
//! Usage: cargo run --bin gateway-sim [server_addr]

use std::env;
use std::net::SocketAddr;

use base64::Engine;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Duration};

use lorahub::gateway::protocol::{
    packet_type, DatR, PacketType, PullDataPacket, PushDataPacket, PushDataPayload, Rxpk, Stat,
};
use lorahub::lorawan::Eui64;

const GATEWAY_MAC: Eui64 = Eui64([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1680".to_string())
        .parse()?;

    println!("lorahub gateway simulator");
    println!("  target:      {}", server_addr);
    println!("  gateway MAC: {}", GATEWAY_MAC);
    println!();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut token: u16 = 0;

    // announce the downlink address first, like a real forwarder
    token = token.wrapping_add(1);
    let pull = PullDataPacket {
        random_token: token,
        gateway_mac: GATEWAY_MAC,
    };
    println!("-> PULL_DATA (token 0x{:04x})", token);
    socket.send_to(&pull.to_bytes(), server_addr).await?;
    await_ack(&socket).await;

    let scenarios: Vec<(&str, PushDataPayload)> = vec![
        ("gateway status", stat_payload()),
        (
            "unconfirmed data up (temperature sensor)",
            rxpk_payload(
                868.1,
                -65,
                7.5,
                "SF7BW125",
                // DevAddr 260b1234, FCnt 66, FPort 1, fake MIC
                vec![
                    0x40, 0x34, 0x12, 0x0b, 0x26, 0x80, 0x42, 0x00, 0x01, 0x00, 0xe1, 0x78,
                    0x56, 0x34, 0x12,
                ],
            ),
        ),
        (
            "confirmed data up (door sensor)",
            rxpk_payload(
                868.3,
                -112,
                -5.0,
                "SF10BW125",
                vec![
                    0x80, 0x78, 0x56, 0x0b, 0x26, 0x00, 0x07, 0x00, 0x02, 0x01, 0xdd, 0xcc,
                    0xbb, 0xaa,
                ],
            ),
        ),
        (
            "join request",
            rxpk_payload(
                868.5,
                -90,
                2.0,
                "SF8BW125",
                vec![
                    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xa1, 0xa2, 0xa3,
                    0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0x42, 0x00, 0xef, 0xbe, 0xad, 0xde,
                ],
            ),
        ),
    ];

    for (desc, payload) in scenarios {
        token = token.wrapping_add(1);
        let packet = PushDataPacket {
            random_token: token,
            gateway_mac: GATEWAY_MAC,
            payload,
        };

        println!("-> PUSH_DATA (token 0x{:04x}): {}", token, desc);
        socket.send_to(&packet.to_bytes()?, server_addr).await?;
        await_ack(&socket).await;

        sleep(Duration::from_millis(500)).await;
    }

    println!("done");
    Ok(())
}

async fn await_ack(socket: &UdpSocket) {
    let mut buf = [0u8; 64];
    match timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => match packet_type(&buf[..len]) {
            Ok(PacketType::PushAck) => println!("<- PUSH_ACK from {}", from),
            Ok(PacketType::PullAck) => println!("<- PULL_ACK from {}", from),
            Ok(pt) => println!("<- unexpected {} from {}", pt, from),
            Err(e) => println!("<- unparseable reply from {}: {}", from, e),
        },
        Ok(Err(e)) => println!("<- recv error: {}", e),
        Err(_) => println!("<- no ack (timeout)"),
    }
    println!();
}

fn stat_payload() -> PushDataPayload {
    PushDataPayload {
        rxpk: Vec::new(),
        stat: Some(Stat {
            time: Some("2026-08-01 12:00:00 GMT".to_string()),
            lati: 52.373,
            long: 4.893,
            alti: 15,
            rxnb: 47,
            rxok: 44,
            rxfw: 44,
            ackr: 100.0,
            dwnb: 3,
        }),
    }
}

fn rxpk_payload(freq: f64, rssi: i16, lsnr: f64, datr: &str, phy: Vec<u8>) -> PushDataPayload {
    PushDataPayload {
        rxpk: vec![Rxpk {
            time: None,
            tmst: 708_016_819,
            freq,
            chan: 2,
            rfch: 1,
            stat: 1,
            modu: "LORA".to_string(),
            datr: DatR::Lora(datr.to_string()),
            codr: "4/5".to_string(),
            rssi,
            lsnr,
            size: phy.len() as u16,
            data: base64::engine::general_purpose::STANDARD.encode(&phy),
        }],
        stat: None,
    }
}
