//! NodeSession entity: the security and counter state of an active
//! device session, keyed by DevAddr and expired by TTL.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lorawan::{AesKey, DevAddr, Eui64};
use crate::storage::Storage;

/// Ceiling on how many lost frames the counter reconstruction will skip
/// over before forcing a re-session.
pub const MAX_FCNT_GAP: u32 = 16_384;

/// Sessions that stay silent this long are forgotten.
const SESSION_TTL: Duration = Duration::from_secs(31 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSession {
    #[serde(rename = "devAddr")]
    pub dev_addr: DevAddr,
    #[serde(rename = "devEUI")]
    pub dev_eui: Eui64,
    #[serde(rename = "nwkSKey")]
    pub nwk_s_key: AesKey,
    #[serde(rename = "appSKey")]
    pub app_s_key: AesKey,
    /// Next expected uplink counter.
    #[serde(rename = "fCntUp")]
    pub fcnt_up: u32,
    #[serde(rename = "fCntDown")]
    pub fcnt_down: u32,
}

impl NodeSession {
    /// Lift the 16 on-air FCnt bits to the full 32-bit counter.
    ///
    /// The candidate in the server's current 64k block is preferred; a
    /// rollover into the next block is accepted as long as the implied gap
    /// stays within [`MAX_FCNT_GAP`]. Anything else (replays included)
    /// yields `None`.
    pub fn validate_and_get_full_fcnt_up(&self, packet_fcnt: u32) -> Option<u32> {
        let server = self.fcnt_up;
        let candidate = (server & 0xffff_0000) | (packet_fcnt & 0xffff);
        if candidate >= server && candidate - server <= MAX_FCNT_GAP {
            return Some(candidate);
        }
        let rolled = candidate.wrapping_add(0x1_0000);
        if rolled >= server && rolled - server <= MAX_FCNT_GAP {
            return Some(rolled);
        }
        None
    }
}

#[derive(Clone)]
pub struct NodeSessionStore {
    storage: Arc<dyn Storage>,
}

impl NodeSessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(dev_addr: DevAddr) -> String {
        format!("nodesession:{}", dev_addr)
    }

    /// Create the session, starting its TTL.
    pub async fn create(&self, session: &NodeSession) -> Result<()> {
        let key = Self::key(session.dev_addr);
        if self.storage.get(&key).await?.is_some() {
            return Err(Error::ObjectExists);
        }
        self.storage
            .set_with_ttl(&key, serde_json::to_string(session)?, SESSION_TTL)
            .await
    }

    pub async fn get(&self, dev_addr: DevAddr) -> Result<NodeSession> {
        let raw = self
            .storage
            .get(&Self::key(dev_addr))
            .await?
            .ok_or(Error::ObjectDoesNotExist)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Rewrite the session, refreshing its TTL.
    pub async fn update(&self, session: &NodeSession) -> Result<()> {
        let key = Self::key(session.dev_addr);
        if self.storage.get(&key).await?.is_none() {
            return Err(Error::ObjectDoesNotExist);
        }
        self.storage
            .set_with_ttl(&key, serde_json::to_string(session)?, SESSION_TTL)
            .await
    }

    pub async fn delete(&self, dev_addr: DevAddr) -> Result<()> {
        if !self.storage.delete(&Self::key(dev_addr)).await? {
            return Err(Error::ObjectDoesNotExist);
        }
        Ok(())
    }
}
