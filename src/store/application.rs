//! Application entity: the destination of decrypted uplink payloads.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lorawan::Eui64;
use crate::storage::Storage;

/// An application, addressed by its AppEUI. The config map carries
/// back-end specific settings such as `callbackURL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    #[serde(rename = "appEUI")]
    pub app_eui: Eui64,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

#[derive(Clone)]
pub struct ApplicationStore {
    storage: Arc<dyn Storage>,
}

impl ApplicationStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(app_eui: Eui64) -> String {
        format!("application:{}", app_eui)
    }

    pub async fn create(&self, app: &Application) -> Result<()> {
        let key = Self::key(app.app_eui);
        if self.storage.get(&key).await?.is_some() {
            return Err(Error::ObjectExists);
        }
        self.storage.set(&key, serde_json::to_string(app)?).await
    }

    pub async fn get(&self, app_eui: Eui64) -> Result<Application> {
        let raw = self
            .storage
            .get(&Self::key(app_eui))
            .await?
            .ok_or(Error::ObjectDoesNotExist)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn update(&self, app: &Application) -> Result<()> {
        let key = Self::key(app.app_eui);
        if self.storage.get(&key).await?.is_none() {
            return Err(Error::ObjectDoesNotExist);
        }
        self.storage.set(&key, serde_json::to_string(app)?).await
    }

    pub async fn delete(&self, app_eui: Eui64) -> Result<()> {
        if !self.storage.delete(&Self::key(app_eui)).await? {
            return Err(Error::ObjectDoesNotExist);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> ApplicationStore {
        ApplicationStore::new(Arc::new(MemoryStorage::new()))
    }

    fn app() -> Application {
        Application {
            app_eui: Eui64([2; 8]),
            config: HashMap::from([(
                "callbackURL".to_string(),
                "http://example.com/handler".to_string(),
            )]),
        }
    }

    #[tokio::test]
    async fn create_get_round_trip() {
        let s = store();
        s.create(&app()).await.unwrap();
        assert_eq!(s.get(Eui64([2; 8])).await.unwrap(), app());
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let s = store();
        s.create(&app()).await.unwrap();
        assert!(matches!(s.create(&app()).await, Err(Error::ObjectExists)));
    }

    #[tokio::test]
    async fn get_update_delete_missing() {
        let s = store();
        assert!(matches!(
            s.get(Eui64([9; 8])).await,
            Err(Error::ObjectDoesNotExist)
        ));
        assert!(matches!(
            s.update(&app()).await,
            Err(Error::ObjectDoesNotExist)
        ));
        assert!(matches!(
            s.delete(Eui64([2; 8])).await,
            Err(Error::ObjectDoesNotExist)
        ));
    }

    #[tokio::test]
    async fn update_replaces_config() {
        let s = store();
        s.create(&app()).await.unwrap();

        let mut updated = app();
        updated
            .config
            .insert("callbackURL".into(), "http://other/".into());
        s.update(&updated).await.unwrap();
        assert_eq!(s.get(Eui64([2; 8])).await.unwrap(), updated);
    }
}
