//! LoRaWAN network server.
//!
//! Terminates the Semtech packet-forwarder UDP protocol spoken by
//! gateways, deduplicates uplink frames received by multiple gateways,
//! validates and decrypts the LoRaWAN MAC layer and forwards application
//! payloads to the configured back-end. Downlink frames travel the other
//! way, from the application channel to the owning gateway.

pub mod api;
pub mod application;
pub mod client;
pub mod collector;
pub mod config;
pub mod downlink;
pub mod error;
pub mod gateway;
pub mod lorawan;
pub mod packet;
pub mod storage;
pub mod store;
pub mod uplink;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
