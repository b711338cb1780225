//! Error kinds shared across the server core.

use crate::lorawan::{DevAddr, MType};

/// Errors produced by the uplink/downlink pipeline, the storage layer and
/// the entity stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Corrupted or unknown gateway datagram.
    #[error("invalid wire format: {0}")]
    WireFormat(String),

    /// Malformed EUI/DevAddr/key text form.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Create on an already-existing object.
    #[error("object already exists")]
    ObjectExists,

    /// Get/update/delete on a missing object.
    #[error("object does not exist")]
    ObjectDoesNotExist,

    /// Downlink aimed at a gateway without a known peer address.
    #[error("gateway is not registered")]
    GatewayNotRegistered,

    /// No node-session exists for the uplink's DevAddr.
    #[error("no node-session for DevAddr {0}")]
    NoSession(DevAddr),

    /// Frame counter did not reconstruct (replay or too many lost frames).
    #[error("invalid FCnt or too many dropped frames (packet: {packet}, server: {server})")]
    InvalidFCnt { packet: u32, server: u32 },

    /// Message integrity check failed under the session NwkSKey.
    #[error("invalid MIC")]
    InvalidMic,

    /// LoRaWAN message class the server does not handle.
    #[error("unknown MType: {0}")]
    UnknownMType(MType),

    /// The packet collector returned a group without any observation.
    #[error("packet collector returned zero packets")]
    EmptyCollection,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("application backend error: {0}")]
    Application(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
