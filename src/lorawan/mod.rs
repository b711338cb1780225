//! LoRaWAN MAC-layer frame codec.
//!
//! Frame structure (data up/down):
//!   MHDR(1) | DevAddr(4,LE) | FCtrl(1) | FCnt(2,LE) | FOpts(0..15)
//!   | [FPort(1) | FRMPayload(N)] | MIC(4)
//!
//! All multi-byte fields are little-endian on the air; EUIs and DevAddr are
//! kept in display (big-endian) order in memory and reversed at the wire
//! boundary.

pub mod crypto;

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// EUI-64 identifier (gateway MAC, AppEUI, DevEUI).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

/// 32-bit device address of an active session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevAddr(pub [u8; 4]);

/// 128-bit AES key (AppKey, NwkSKey, AppSKey).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AesKey(pub [u8; 16]);

macro_rules! hex_newtype {
    ($name:ident, $len:expr, $what:expr) => {
        impl $name {
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let b = hex::decode(s)
                    .map_err(|e| Error::InvalidId(format!("{}: {}", $what, e)))?;
                let b: [u8; $len] = b.try_into().map_err(|_| {
                    Error::InvalidId(format!("{} is exactly {} bytes", $what, $len))
                })?;
                Ok(Self(b))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_newtype!(Eui64, 8, "an EUI-64");
hex_newtype!(DevAddr, 4, "a DevAddr");
hex_newtype!(AesKey, 16, "an AES-128 key");

impl DevAddr {
    pub fn from_u32(v: u32) -> Self {
        Self(v.to_be_bytes())
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

/// MHDR message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    Rfu,
    Proprietary,
}

impl MType {
    fn from_byte(mhdr: u8) -> Self {
        match (mhdr >> 5) & 0x07 {
            0b000 => MType::JoinRequest,
            0b001 => MType::JoinAccept,
            0b010 => MType::UnconfirmedDataUp,
            0b011 => MType::UnconfirmedDataDown,
            0b100 => MType::ConfirmedDataUp,
            0b101 => MType::ConfirmedDataDown,
            0b110 => MType::Rfu,
            _ => MType::Proprietary,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0b000,
            MType::JoinAccept => 0b001,
            MType::UnconfirmedDataUp => 0b010,
            MType::UnconfirmedDataDown => 0b011,
            MType::ConfirmedDataUp => 0b100,
            MType::ConfirmedDataDown => 0b101,
            MType::Rfu => 0b110,
            MType::Proprietary => 0b111,
        }
    }

    /// True for the two uplink data classes handled by the server.
    pub fn is_data_up(self) -> bool {
        matches!(self, MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MType::JoinRequest => "JoinRequest",
            MType::JoinAccept => "JoinAccept",
            MType::UnconfirmedDataUp => "UnconfirmedDataUp",
            MType::UnconfirmedDataDown => "UnconfirmedDataDown",
            MType::ConfirmedDataUp => "ConfirmedDataUp",
            MType::ConfirmedDataDown => "ConfirmedDataDown",
            MType::Rfu => "RFU",
            MType::Proprietary => "Proprietary",
        };
        f.write_str(s)
    }
}

/// MAC header: message type plus major protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub mtype: MType,
    pub major: u8,
}

impl Mhdr {
    fn from_byte(b: u8) -> Self {
        Self {
            mtype: MType::from_byte(b),
            major: b & 0x03,
        }
    }

    fn to_byte(self) -> u8 {
        (self.mtype.to_bits() << 5) | (self.major & 0x03)
    }
}

/// Frame-control flags. FOptsLen is derived from `Fhdr::fopts` at marshal
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
}

impl FCtrl {
    fn from_byte(b: u8) -> (Self, usize) {
        (
            Self {
                adr: b & 0x80 != 0,
                adr_ack_req: b & 0x40 != 0,
                ack: b & 0x20 != 0,
                f_pending: b & 0x10 != 0,
            },
            (b & 0x0f) as usize,
        )
    }

    fn to_byte(self, fopts_len: usize) -> u8 {
        let mut b = (fopts_len as u8) & 0x0f;
        if self.adr {
            b |= 0x80;
        }
        if self.adr_ack_req {
            b |= 0x40;
        }
        if self.ack {
            b |= 0x20;
        }
        if self.f_pending {
            b |= 0x10;
        }
        b
    }
}

/// Frame header of a data MACPayload.
///
/// `fcnt` is the server-side 32-bit counter; only the low 16 bits exist on
/// the air. After parsing it holds the wire value, the uplink processor
/// widens it to the reconstructed full counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fhdr {
    pub dev_addr: DevAddr,
    pub fctrl: FCtrl,
    pub fcnt: u32,
    pub fopts: Vec<u8>,
}

/// Data-class MACPayload (uplink and downlink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacPayload {
    pub fhdr: Fhdr,
    pub fport: Option<u8>,
    pub frm_payload: Vec<u8>,
}

/// JoinRequest MACPayload. Parsed but not processed (OTAA is deferred).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: u16,
}

/// The MACPayload variants of a PHYPayload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    MacPayload(MacPayload),
    JoinRequest(JoinRequestPayload),
    /// Encrypted JoinAccept body, kept opaque.
    JoinAccept(Vec<u8>),
    Proprietary(Vec<u8>),
}

/// A parsed LoRaWAN physical payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPayload {
    pub mhdr: Mhdr,
    pub payload: Payload,
    pub mic: [u8; 4],
}

impl PhyPayload {
    /// Parse a raw PHYPayload (the base64-decoded `rxpk.data`).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::WireFormat("empty PHYPayload".into()));
        }
        let mhdr = Mhdr::from_byte(data[0]);

        match mhdr.mtype {
            MType::JoinRequest => Self::parse_join_request(mhdr, data),
            MType::JoinAccept => Ok(Self {
                mhdr,
                payload: Payload::JoinAccept(data[1..].to_vec()),
                mic: [0; 4],
            }),
            MType::UnconfirmedDataUp
            | MType::UnconfirmedDataDown
            | MType::ConfirmedDataUp
            | MType::ConfirmedDataDown => Self::parse_data(mhdr, data),
            MType::Rfu | MType::Proprietary => Ok(Self {
                mhdr,
                payload: Payload::Proprietary(data[1..].to_vec()),
                mic: [0; 4],
            }),
        }
    }

    fn parse_join_request(mhdr: Mhdr, data: &[u8]) -> Result<Self> {
        // MHDR(1) + AppEUI(8) + DevEUI(8) + DevNonce(2) + MIC(4)
        if data.len() != 23 {
            return Err(Error::WireFormat(format!(
                "JoinRequest must be 23 bytes, got {}",
                data.len()
            )));
        }
        let mut app_eui = [0u8; 8];
        let mut dev_eui = [0u8; 8];
        for i in 0..8 {
            app_eui[i] = data[8 - i];
            dev_eui[i] = data[16 - i];
        }
        let dev_nonce = u16::from_le_bytes([data[17], data[18]]);
        let mut mic = [0u8; 4];
        mic.copy_from_slice(&data[19..23]);

        Ok(Self {
            mhdr,
            payload: Payload::JoinRequest(JoinRequestPayload {
                app_eui: Eui64(app_eui),
                dev_eui: Eui64(dev_eui),
                dev_nonce,
            }),
            mic,
        })
    }

    fn parse_data(mhdr: Mhdr, data: &[u8]) -> Result<Self> {
        // MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2) + MIC(4)
        if data.len() < 12 {
            return Err(Error::WireFormat(format!(
                "data frame too short: {} bytes",
                data.len()
            )));
        }

        let mut dev_addr = [0u8; 4];
        for i in 0..4 {
            dev_addr[i] = data[4 - i];
        }
        let (fctrl, fopts_len) = FCtrl::from_byte(data[5]);
        let fcnt = u16::from_le_bytes([data[6], data[7]]) as u32;

        let fopts_end = 8 + fopts_len;
        let mic_start = data.len() - 4;
        if fopts_end > mic_start {
            return Err(Error::WireFormat(format!(
                "FOpts length {} exceeds available data",
                fopts_len
            )));
        }
        let fopts = data[8..fopts_end].to_vec();

        let (fport, frm_payload) = if fopts_end < mic_start {
            (
                Some(data[fopts_end]),
                data[fopts_end + 1..mic_start].to_vec(),
            )
        } else {
            (None, Vec::new())
        };

        let mut mic = [0u8; 4];
        mic.copy_from_slice(&data[mic_start..]);

        Ok(Self {
            mhdr,
            payload: Payload::MacPayload(MacPayload {
                fhdr: Fhdr {
                    dev_addr: DevAddr(dev_addr),
                    fctrl,
                    fcnt,
                    fopts,
                },
                fport,
                frm_payload,
            }),
            mic,
        })
    }

    /// Serialize back to wire bytes. For data frames the FCnt is truncated
    /// to its 16 on-air bits.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.push(self.mhdr.to_byte());

        match &self.payload {
            Payload::MacPayload(mac) => {
                let mut addr = mac.fhdr.dev_addr.0;
                addr.reverse();
                out.extend_from_slice(&addr);
                out.push(mac.fhdr.fctrl.to_byte(mac.fhdr.fopts.len()));
                out.extend_from_slice(&(mac.fhdr.fcnt as u16).to_le_bytes());
                out.extend_from_slice(&mac.fhdr.fopts);
                if let Some(port) = mac.fport {
                    out.push(port);
                    out.extend_from_slice(&mac.frm_payload);
                }
                out.extend_from_slice(&self.mic);
            }
            Payload::JoinRequest(jr) => {
                let mut app_eui = jr.app_eui.0;
                let mut dev_eui = jr.dev_eui.0;
                app_eui.reverse();
                dev_eui.reverse();
                out.extend_from_slice(&app_eui);
                out.extend_from_slice(&dev_eui);
                out.extend_from_slice(&jr.dev_nonce.to_le_bytes());
                out.extend_from_slice(&self.mic);
            }
            Payload::JoinAccept(body) | Payload::Proprietary(body) => {
                out.extend_from_slice(body);
            }
        }
        out
    }

    /// The data-class MACPayload, if this frame carries one.
    pub fn mac_payload(&self) -> Option<&MacPayload> {
        match &self.payload {
            Payload::MacPayload(mac) => Some(mac),
            _ => None,
        }
    }

    pub fn mac_payload_mut(&mut self) -> Option<&mut MacPayload> {
        match &mut self.payload {
            Payload::MacPayload(mac) => Some(mac),
            _ => None,
        }
    }

    /// Verify the MIC of an uplink data frame against the 32-bit
    /// reconstructed frame counter. Comparison is constant-time.
    pub fn verify_uplink_mic(&self, key: &AesKey, full_fcnt: u32) -> Result<bool> {
        let mac = self
            .mac_payload()
            .ok_or_else(|| Error::WireFormat("MIC check on non-data frame".into()))?;
        let bytes = self.to_bytes();
        let msg = &bytes[..bytes.len() - 4];
        let expected =
            crypto::data_frame_mic(key, crypto::Direction::Up, mac.fhdr.dev_addr, full_fcnt, msg);
        Ok(crypto::mic_eq(&expected, &self.mic))
    }

    /// Compute and set the MIC of an uplink data frame.
    pub fn set_uplink_mic(&mut self, key: &AesKey, full_fcnt: u32) -> Result<()> {
        let mac = self
            .mac_payload()
            .ok_or_else(|| Error::WireFormat("MIC set on non-data frame".into()))?;
        let dev_addr = mac.fhdr.dev_addr;
        let bytes = self.to_bytes();
        let msg = &bytes[..bytes.len() - 4];
        self.mic = crypto::data_frame_mic(key, crypto::Direction::Up, dev_addr, full_fcnt, msg);
        Ok(())
    }
}

// PHYPayloads travel through storage (collection lists) as base64 wire
// bytes, so serde round-trips through the binary codec.
impl Serialize for PhyPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(self.to_bytes());
        serializer.serialize_str(&b64)
    }
}

impl<'de> Deserialize<'de> for PhyPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(D::Error::custom)?;
        PhyPayload::from_bytes(&bytes).map_err(D::Error::custom)
    }
}
