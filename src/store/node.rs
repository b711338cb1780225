//! Node entity: an end-device belonging to an application.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lorawan::{AesKey, Eui64};
use crate::storage::Storage;

/// An end-device, addressed by its DevEUI. The AppKey is held for
/// over-the-air activation, which the server does not perform yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "devEUI")]
    pub dev_eui: Eui64,
    #[serde(rename = "appEUI")]
    pub app_eui: Eui64,
    #[serde(rename = "appKey")]
    pub app_key: AesKey,
}

#[derive(Clone)]
pub struct NodeStore {
    storage: Arc<dyn Storage>,
}

impl NodeStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(dev_eui: Eui64) -> String {
        format!("node:{}", dev_eui)
    }

    pub async fn create(&self, node: &Node) -> Result<()> {
        let key = Self::key(node.dev_eui);
        if self.storage.get(&key).await?.is_some() {
            return Err(Error::ObjectExists);
        }
        self.storage.set(&key, serde_json::to_string(node)?).await
    }

    pub async fn get(&self, dev_eui: Eui64) -> Result<Node> {
        let raw = self
            .storage
            .get(&Self::key(dev_eui))
            .await?
            .ok_or(Error::ObjectDoesNotExist)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn update(&self, node: &Node) -> Result<()> {
        let key = Self::key(node.dev_eui);
        if self.storage.get(&key).await?.is_none() {
            return Err(Error::ObjectDoesNotExist);
        }
        self.storage.set(&key, serde_json::to_string(node)?).await
    }

    pub async fn delete(&self, dev_eui: Eui64) -> Result<()> {
        if !self.storage.delete(&Self::key(dev_eui)).await? {
            return Err(Error::ObjectDoesNotExist);
        }
        Ok(())
    }
}
