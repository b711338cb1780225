//! Semtech packet-forwarder UDP wire codec.
//!
//! Reference: https://github.com/Lora-net/packet_forwarder/blob/master/PROTOCOL.TXT
//!
//! Every datagram starts with a 4-byte binary header (version, random
//! token, identifier), PUSH_DATA and PULL_DATA add the 8-byte gateway MAC,
//! and the data-carrying types append a JSON object. Multi-byte integers
//! are big-endian.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lorawan::Eui64;

/// Protocol version spoken by the reference packet forwarder.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Packet identifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(PacketType::PushData),
            0x01 => Ok(PacketType::PushAck),
            0x02 => Ok(PacketType::PullData),
            0x03 => Ok(PacketType::PullResp),
            0x04 => Ok(PacketType::PullAck),
            _ => Err(Error::WireFormat(format!(
                "unknown packet type: 0x{:02x}",
                value
            ))),
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PacketType::PushData => "PUSH_DATA",
            PacketType::PushAck => "PUSH_ACK",
            PacketType::PullData => "PULL_DATA",
            PacketType::PullResp => "PULL_RESP",
            PacketType::PullAck => "PULL_ACK",
        };
        f.write_str(s)
    }
}

/// Identify a datagram without fully parsing it.
pub fn packet_type(data: &[u8]) -> Result<PacketType> {
    if data.len() < 4 {
        return Err(Error::WireFormat(format!(
            "datagram too short: {} bytes",
            data.len()
        )));
    }
    if data[0] != PROTOCOL_VERSION {
        return Err(Error::WireFormat(format!(
            "unknown protocol version: 0x{:02x}",
            data[0]
        )));
    }
    PacketType::try_from(data[3])
}

fn header(buf: &mut BytesMut, random_token: u16, pt: PacketType) {
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u16(random_token);
    buf.put_u8(pt as u8);
}

fn parse_header(data: &[u8], expected: PacketType) -> Result<u16> {
    let pt = packet_type(data)?;
    if pt != expected {
        return Err(Error::WireFormat(format!(
            "expected {}, got {}",
            expected, pt
        )));
    }
    let mut buf = &data[1..3];
    Ok(buf.get_u16())
}

fn parse_gateway_mac(data: &[u8]) -> Result<Eui64> {
    if data.len() < 12 {
        return Err(Error::WireFormat(format!(
            "datagram too short for gateway MAC: {} bytes",
            data.len()
        )));
    }
    let mut mac = [0u8; 8];
    mac.copy_from_slice(&data[4..12]);
    Ok(Eui64(mac))
}

/// Received-packet record of a PUSH_DATA JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rxpk {
    /// UTC time of reception, compact ISO 8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Concentrator tick at reception (µs).
    pub tmst: u32,
    /// Frequency in MHz.
    pub freq: f64,
    /// Concentrator IF channel.
    #[serde(default)]
    pub chan: u8,
    /// Concentrator RF chain.
    #[serde(default)]
    pub rfch: u8,
    /// CRC status: 1 ok, -1 fail, 0 no CRC.
    pub stat: i8,
    /// "LORA" or "FSK".
    pub modu: String,
    pub datr: DatR,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub codr: String,
    pub rssi: i16,
    #[serde(default)]
    pub lsnr: f64,
    pub size: u16,
    /// Base64 (standard, padded) PHYPayload.
    pub data: String,
}

/// Status record of a PUSH_DATA JSON payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub lati: f64,
    #[serde(default)]
    pub long: f64,
    #[serde(default)]
    pub alti: i32,
    #[serde(default)]
    pub rxnb: u32,
    #[serde(default)]
    pub rxok: u32,
    #[serde(default)]
    pub rxfw: u32,
    #[serde(default)]
    pub ackr: f64,
    #[serde(default)]
    pub dwnb: u32,
}

/// Transmit record of a PULL_RESP JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Txpk {
    /// Send immediately, ignoring `tmst`.
    #[serde(default)]
    pub imme: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
    pub freq: f64,
    pub rfch: u8,
    pub powe: u8,
    pub modu: String,
    pub datr: DatR,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub codr: String,
    /// FSK frequency deviation in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdev: Option<u16>,
    /// Invert LoRa polarity (required for LoRaWAN downlinks).
    #[serde(default)]
    pub ipol: bool,
    pub size: u16,
    /// Disable the physical CRC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncrc: Option<bool>,
    /// Base64 (standard, padded) PHYPayload.
    pub data: String,
}

/// Data-rate field: a string for LoRa ("SF7BW125"), a number for FSK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatR {
    Lora(String),
    Fsk(u32),
}

/// PUSH_DATA: gateway → server, carrying received packets and/or stats.
#[derive(Debug, Clone, PartialEq)]
pub struct PushDataPacket {
    pub random_token: u16,
    pub gateway_mac: Eui64,
    pub payload: PushDataPayload,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushDataPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rxpk: Vec<Rxpk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat: Option<Stat>,
}

impl PushDataPacket {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let random_token = parse_header(data, PacketType::PushData)?;
        let gateway_mac = parse_gateway_mac(data)?;
        let payload: PushDataPayload = serde_json::from_slice(&data[12..])
            .map_err(|e| Error::WireFormat(format!("invalid PUSH_DATA JSON: {}", e)))?;
        Ok(Self {
            random_token,
            gateway_mac,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(128);
        header(&mut buf, self.random_token, PacketType::PushData);
        buf.put_slice(&self.gateway_mac.0);
        buf.put_slice(&serde_json::to_vec(&self.payload)?);
        Ok(buf.to_vec())
    }
}

/// PUSH_ACK: server → gateway, echoes the PUSH_DATA token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushAckPacket {
    pub random_token: u16,
}

impl PushAckPacket {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let random_token = parse_header(data, PacketType::PushAck)?;
        Ok(Self { random_token })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4);
        header(&mut buf, self.random_token, PacketType::PushAck);
        buf.to_vec()
    }
}

/// PULL_DATA: gateway → server, establishes the downlink peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullDataPacket {
    pub random_token: u16,
    pub gateway_mac: Eui64,
}

impl PullDataPacket {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let random_token = parse_header(data, PacketType::PullData)?;
        let gateway_mac = parse_gateway_mac(data)?;
        Ok(Self {
            random_token,
            gateway_mac,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(12);
        header(&mut buf, self.random_token, PacketType::PullData);
        buf.put_slice(&self.gateway_mac.0);
        buf.to_vec()
    }
}

/// PULL_ACK: server → gateway, echoes the PULL_DATA token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullAckPacket {
    pub random_token: u16,
}

impl PullAckPacket {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let random_token = parse_header(data, PacketType::PullAck)?;
        Ok(Self { random_token })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4);
        header(&mut buf, self.random_token, PacketType::PullAck);
        buf.to_vec()
    }
}

/// PULL_RESP: server → gateway, carries a frame to transmit.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRespPacket {
    pub random_token: u16,
    pub payload: PullRespPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRespPayload {
    pub txpk: Txpk,
}

impl PullRespPacket {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let random_token = parse_header(data, PacketType::PullResp)?;
        let payload: PullRespPayload = serde_json::from_slice(&data[4..])
            .map_err(|e| Error::WireFormat(format!("invalid PULL_RESP JSON: {}", e)))?;
        Ok(Self {
            random_token,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(128);
        header(&mut buf, self.random_token, PacketType::PullResp);
        buf.put_slice(&serde_json::to_vec(&self.payload)?);
        Ok(buf.to_vec())
    }
}
