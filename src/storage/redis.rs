//! Redis storage back-end.
//!
//! Uses a multiplexed connection manager so every call can clone a cheap
//! handle. The collector's mutual exclusion maps onto `SET NX PX`.

use std::time::Duration;

use async_trait::async_trait;

use super::Storage;
use crate::error::{Error, Result};

pub struct RedisStorage {
    manager: redis::aio::ConnectionManager,
}

impl RedisStorage {
    /// Connect to `server` (host:port), authenticating when `password` is
    /// non-empty.
    pub async fn connect(server: &str, password: &str) -> Result<Self> {
        let url = if password.is_empty() {
            format!("redis://{}/", server)
        } else {
            format!("redis://:{}@{}/", password, server)
        };
        let client = redis::Client::open(url).map_err(storage_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(storage_err)?;
        Ok(Self { manager })
    }
}

fn storage_err(e: redis::RedisError) -> Error {
    Error::Storage(e.to_string())
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut con = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut con = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut con = self.manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn list_append(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut con = self.manager.clone();
        redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .ignore()
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn list_get_all(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut con = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("lock")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await
            .map_err(storage_err)?;
        Ok(reply.is_some())
    }

    async fn flush_all(&self) -> Result<()> {
        let mut con = self.manager.clone();
        redis::cmd("FLUSHALL")
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }
}
