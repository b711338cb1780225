//! Gateway fan-in deduplication.
//!
//! The same transmission reaches every gateway in range, each of which
//! forwards its own copy. Observations are grouped by the frame's MIC (the
//! last four PHYPayload bytes, unique per transmission for uncorrupted
//! frames): every arrival is appended to a short-lived list in storage,
//! and the first observer (decided by an atomic set-if-absent lock)
//! waits out the collection window, then drains the list and fires the
//! callback exactly once for the whole group.
//!
//! Crash safety comes from the TTLs: both the list and the lock outlive
//! the window only by the grace period, so a dead first observer just
//! means the next transmission starts a fresh round.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;

use crate::error::{Error, Result};
use crate::packet::{sort_by_signal, RxPacket};
use crate::storage::Storage;

/// How long observations of one transmission are aggregated before
/// dispatch.
pub const DEFAULT_COLLECTION_WINDOW: Duration = Duration::from_millis(200);

/// Extra lifetime for the list and lock beyond the window.
const GRACE: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Collector {
    storage: Arc<dyn Storage>,
    window: Duration,
}

impl Collector {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            window: DEFAULT_COLLECTION_WINDOW,
        }
    }

    /// Override the collection window (tests use short windows).
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Record one gateway's observation of an uplink and, when this call
    /// is the transmission's first observer, dispatch the collected group
    /// after the window closes. The callback receives the group sorted
    /// best-signal-first and runs at most once per transmission.
    pub async fn collect_and_call_once<F, Fut>(&self, packet: RxPacket, callback: F) -> Result<()>
    where
        F: FnOnce(Vec<RxPacket>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let fingerprint =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(packet.phy_payload.mic);
        let list_key = format!("packet.{}", fingerprint);
        let lock_key = format!("lock:{}", fingerprint);
        let ttl = self.window + GRACE;

        self.storage
            .list_append(&list_key, serde_json::to_string(&packet)?, ttl)
            .await?;

        if !self.storage.acquire_lock(&lock_key, ttl).await? {
            // another observer owns the window for this transmission
            return Ok(());
        }

        tokio::time::sleep(self.window).await;

        let raw = self.storage.list_get_all(&list_key).await?;
        self.storage.delete(&list_key).await?;
        self.storage.delete(&lock_key).await?;

        if raw.is_empty() {
            return Err(Error::EmptyCollection);
        }

        let mut packets = raw
            .iter()
            .map(|s| serde_json::from_str(s))
            .collect::<Result<Vec<RxPacket>, _>>()?;
        sort_by_signal(&mut packets);

        callback(packets).await
    }
}
