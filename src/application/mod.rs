//! Application back-end capability surface.

pub mod http;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::lorawan::Eui64;
use crate::packet::RxPacket;

pub use http::HttpApplicationBackend;

/// Sink for processed uplink payloads. Downlink frames flow the other way
/// through the TXPacket channel handed out when the concrete back-end is
/// constructed.
#[async_trait]
pub trait ApplicationBackend: Send + Sync {
    /// Inject the client after construction (see [`Client::new`]).
    fn set_client(&self, client: Arc<Client>);

    /// Deliver one collected uplink group to the application.
    async fn send(&self, app_eui: Eui64, packets: &[RxPacket]) -> Result<()>;

    /// Stop accepting work and release resources.
    async fn close(&self) -> Result<()>;
}

/// Recording back-end for tests: captures every `send` and can be primed
/// to fail.
#[derive(Default)]
pub struct DummyApplicationBackend {
    sent: Mutex<Vec<(Eui64, Vec<RxPacket>)>>,
    fail: Mutex<bool>,
}

impl DummyApplicationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All groups delivered so far.
    pub fn sent(&self) -> Vec<(Eui64, Vec<RxPacket>)> {
        self.sent.lock().unwrap().clone()
    }

    /// When set, `send` fails without recording anything.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl ApplicationBackend for DummyApplicationBackend {
    fn set_client(&self, _client: Arc<Client>) {}

    async fn send(&self, app_eui: Eui64, packets: &[RxPacket]) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(Error::Application("dummy backend is failing".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((app_eui, packets.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
