//! Wiring hub tying storage, the gateway transport and the application
//! back-end together.
//!
//! Back-ends need access to the entity stores (the gateway transport
//! resolves peer addresses, the HTTP application back-end resolves
//! callback URLs), while the client owns the back-ends. The client is
//! therefore built first and injected into each back-end afterwards via
//! `set_client`.

use std::sync::Arc;

use crate::application::ApplicationBackend;
use crate::collector::Collector;
use crate::gateway::GatewayBackend;
use crate::storage::Storage;
use crate::store::{ApplicationStore, GatewayStore, NodeSessionStore, NodeStore};

pub struct Client {
    storage: Arc<dyn Storage>,
    gateway: Arc<GatewayBackend>,
    application: Arc<dyn ApplicationBackend>,
}

impl Client {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<GatewayBackend>,
        application: Arc<dyn ApplicationBackend>,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            storage,
            gateway,
            application,
        });
        client.gateway.set_client(client.clone());
        client.application.set_client(client.clone());
        client
    }

    pub fn applications(&self) -> ApplicationStore {
        ApplicationStore::new(self.storage.clone())
    }

    pub fn nodes(&self) -> NodeStore {
        NodeStore::new(self.storage.clone())
    }

    pub fn node_sessions(&self) -> NodeSessionStore {
        NodeSessionStore::new(self.storage.clone())
    }

    pub fn gateways(&self) -> GatewayStore {
        GatewayStore::new(self.storage.clone())
    }

    pub fn collector(&self) -> Collector {
        Collector::new(self.storage.clone())
    }

    pub fn gateway_backend(&self) -> &Arc<GatewayBackend> {
        &self.gateway
    }

    pub fn application_backend(&self) -> &Arc<dyn ApplicationBackend> {
        &self.application
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}
