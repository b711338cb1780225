//! In-flight radio packets: uplink observations coming from gateways and
//! downlink frames heading to them.

use serde::{Deserialize, Serialize};

use crate::lorawan::{Eui64, PhyPayload};

/// Radio metadata of a single gateway observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxInfo {
    /// MAC of the receiving gateway.
    pub mac: Eui64,
    /// UTC time from the gateway, when its concentrator provides one.
    pub time: Option<String>,
    /// Concentrator tick (µs, wraps around).
    pub timestamp: u32,
    /// Frequency in MHz.
    pub frequency: f64,
    pub channel: u32,
    pub rf_chain: u32,
    /// 1 = CRC ok, -1 = CRC fail, 0 = no CRC.
    pub crc_status: i8,
    /// "LORA" or "FSK".
    pub modulation: String,
    pub data_rate: DataRate,
    pub coding_rate: String,
    pub rssi: i16,
    pub lora_snr: f64,
    pub size: u16,
}

/// One gateway's observation of an uplink transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxPacket {
    pub phy_payload: PhyPayload,
    pub rx_info: RxInfo,
}

/// Sort a collected group best-gateway-first: RSSI descending, gateway MAC
/// ascending as a stable tie-break.
pub fn sort_by_signal(packets: &mut [RxPacket]) {
    packets.sort_by(|a, b| {
        b.rx_info
            .rssi
            .cmp(&a.rx_info.rssi)
            .then(a.rx_info.mac.cmp(&b.rx_info.mac))
    });
}

/// LoRa or FSK data-rate. Exactly one side is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataRate {
    /// LoRa identifier such as "SF7BW125"; empty for FSK.
    #[serde(default)]
    pub lora: String,
    /// FSK bit rate; 0 for LoRa.
    #[serde(default)]
    pub fsk: u32,
}

impl DataRate {
    pub fn lora(spreading: &str) -> Self {
        Self {
            lora: spreading.to_string(),
            fsk: 0,
        }
    }

    pub fn modulation(&self) -> &'static str {
        if self.lora.is_empty() {
            "FSK"
        } else {
            "LORA"
        }
    }
}

/// Transmission parameters for a downlink frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInfo {
    /// MAC of the gateway that must transmit the frame.
    pub mac: Eui64,
    /// Transmit immediately instead of at `timestamp`.
    pub immediately: bool,
    /// Concentrator tick at which to transmit.
    pub timestamp: Option<u32>,
    pub frequency: f64,
    pub rf_chain: u8,
    pub power: u8,
    pub data_rate: DataRate,
    pub code_rate: String,
    /// FSK frequency deviation in Hz.
    pub frequency_deviation: u16,
    pub disable_crc: bool,
}

/// A downlink frame routed from the application to a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPacket {
    pub phy_payload: PhyPayload,
    pub tx_info: TxInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::Eui64;

    fn packet(mac: [u8; 8], rssi: i16) -> RxPacket {
        RxPacket {
            phy_payload: PhyPayload::from_bytes(&[
                0x40, 0x01, 0x01, 0x01, 0x01, 0x00, 0x0a, 0x00, 0x01, 0xaa, 0x00, 0x00, 0x00,
                0x00,
            ])
            .unwrap(),
            rx_info: RxInfo {
                mac: Eui64(mac),
                time: None,
                timestamp: 0,
                frequency: 868.1,
                channel: 1,
                rf_chain: 1,
                crc_status: 1,
                modulation: "LORA".into(),
                data_rate: DataRate::lora("SF7BW125"),
                coding_rate: "4/5".into(),
                rssi,
                lora_snr: 5.5,
                size: 14,
            },
        }
    }

    #[test]
    fn sorts_by_rssi_descending() {
        let mut packets = vec![
            packet([2; 8], -80),
            packet([1; 8], -20),
            packet([3; 8], -50),
        ];
        sort_by_signal(&mut packets);
        let rssi: Vec<i16> = packets.iter().map(|p| p.rx_info.rssi).collect();
        assert_eq!(rssi, vec![-20, -50, -80]);
    }

    #[test]
    fn equal_rssi_breaks_tie_on_mac() {
        let mut packets = vec![packet([2; 8], -40), packet([1; 8], -40)];
        sort_by_signal(&mut packets);
        assert_eq!(packets[0].rx_info.mac, Eui64([1; 8]));
    }

    #[test]
    fn rx_packet_serde_round_trip() {
        let p = packet([1, 2, 3, 4, 5, 6, 7, 8], -42);
        let json = serde_json::to_string(&p).unwrap();
        let back: RxPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn data_rate_modulation() {
        assert_eq!(DataRate::lora("SF12BW125").modulation(), "LORA");
        assert_eq!(
            DataRate {
                lora: String::new(),
                fsk: 50_000
            }
            .modulation(),
            "FSK"
        );
    }
}
