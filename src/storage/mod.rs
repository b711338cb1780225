//! Key/value storage capability surface.
//!
//! The server core only needs a narrow slice of a Redis-like store: plain
//! get/set (optionally with expiry), short-lived lists for the collection
//! window, and an atomic set-if-absent lock. Everything is behind a trait
//! so tests run against the in-memory back-end.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Set with expiry. Any rewrite refreshes the TTL.
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append to a list, refreshing the list's TTL.
    async fn list_append(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn list_get_all(&self, key: &str) -> Result<Vec<String>>;

    /// Atomic set-if-absent with TTL. Returns true when this caller is the
    /// first holder of the lock.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Drop everything. Test and tooling use only.
    async fn flush_all(&self) -> Result<()>;
}
