//! In-memory storage back-end with the same TTL semantics as the Redis
//! one. Used by the test suites and handy for standalone experiments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::Storage;
use crate::error::Result;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, ListEntry>>,
}

#[derive(Debug)]
struct ListEntry {
    items: Vec<String>,
    expires_at: Instant,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut values = self.values.lock().unwrap();
        match values.get(key) {
            Some(e) if e.expired() => {
                values.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.values.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = match self.values.lock().unwrap().remove(key) {
            Some(e) => !e.expired(),
            None => false,
        };
        let list_existed = self.lists.lock().unwrap().remove(key).is_some();
        Ok(existed || list_existed)
    }

    async fn list_append(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut lists = self.lists.lock().unwrap();
        let now = Instant::now();
        let entry = lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: Vec::new(),
            expires_at: now + ttl,
        });
        if now >= entry.expires_at {
            entry.items.clear();
        }
        entry.items.push(value);
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn list_get_all(&self, key: &str) -> Result<Vec<String>> {
        let mut lists = self.lists.lock().unwrap();
        match lists.get(key) {
            Some(e) if Instant::now() >= e.expires_at => {
                lists.remove(key);
                Ok(Vec::new())
            }
            Some(e) => Ok(e.items.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut values = self.values.lock().unwrap();
        match values.get(key) {
            Some(e) if !e.expired() => Ok(false),
            _ => {
                values.insert(
                    key.to_string(),
                    Entry {
                        value: String::new(),
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn flush_all(&self) -> Result<()> {
        self.values.lock().unwrap().clear();
        self.lists.lock().unwrap().clear();
        Ok(())
    }
}
