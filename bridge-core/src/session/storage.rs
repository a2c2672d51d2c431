//! Session storage backends: in-memory and external key-value (Redis).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::BridgeResult;

/// Abstract session storage backend.
///
/// Sessions are stored as opaque, already-serialized documents; the
/// manager owns the (de)serialization so storage implementations never
/// need to know the session schema.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn store(&self, id: &str, serialized: String) -> BridgeResult<()>;
    async fn retrieve(&self, id: &str, touch: bool) -> BridgeResult<Option<String>>;
    async fn delete(&self, id: &str) -> BridgeResult<bool>;
    async fn list_active(&self) -> BridgeResult<Vec<String>>;
    async fn cleanup_expired(&self, max_age: Duration) -> BridgeResult<usize>;

    /// Starts any background task (e.g. the sweep). No-op by default.
    async fn start(&self) {}
    /// Stops background tasks. No-op by default.
    async fn stop(&self) {}
}

#[derive(Clone, Serialize, Deserialize)]
struct Meta {
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

struct Entry {
    serialized: String,
    meta: Meta,
}

/// In-memory storage with LRU eviction and a periodic background sweep.
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Entry>>,
    order: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    sweep_interval: Duration,
    cancel: CancellationToken,
}

impl MemoryStorage {
    pub fn new(capacity: usize, sweep_interval: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            order: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
            sweep_interval,
            cancel: CancellationToken::new(),
        }
    }

    fn touch_order(&self, id: &str) {
        let mut order = self.order.lock();
        order.retain(|x| x != id);
        order.push_back(id.to_string());
    }

    fn evict_if_over_capacity(&self) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() > self.capacity {
            let oldest = {
                let mut order = self.order.lock();
                order.pop_front()
            };
            match oldest {
                Some(id) => {
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn store(&self, id: &str, serialized: String) -> BridgeResult<()> {
        let now = Utc::now();
        let meta = match self.entries.get(id) {
            Some(existing) => Meta {
                created_at: existing.meta.created_at,
                last_activity: now,
            },
            None => Meta {
                created_at: now,
                last_activity: now,
            },
        };
        self.entries.insert(id.to_string(), Entry { serialized, meta });
        self.touch_order(id);
        self.evict_if_over_capacity();
        Ok(())
    }

    async fn retrieve(&self, id: &str, touch: bool) -> BridgeResult<Option<String>> {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if touch {
                entry.meta.last_activity = Utc::now();
                self.touch_order(id);
            }
            Ok(Some(entry.serialized.clone()))
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, id: &str) -> BridgeResult<bool> {
        let removed = self.entries.remove(id).is_some();
        self.order.lock().retain(|x| x != id);
        Ok(removed)
    }

    async fn list_active(&self) -> BridgeResult<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    async fn cleanup_expired(&self, max_age: Duration) -> BridgeResult<usize> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            let age = now - entry.meta.last_activity;
            if age.to_std().unwrap_or(Duration::ZERO) > max_age {
                expired.push(entry.key().clone());
            }
        }
        for id in &expired {
            self.entries.remove(id);
            self.order.lock().retain(|x| x != id);
        }
        Ok(expired.len())
    }

    async fn start(&self) {
        let entries = self.entries.clone();
        let order = self.order.clone();
        let interval = self.sweep_interval;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let mut expired = Vec::new();
                        for entry in entries.iter() {
                            let age = now - entry.meta.last_activity;
                            if age.to_std().unwrap_or(Duration::ZERO) > interval * 4 {
                                expired.push(entry.key().clone());
                            }
                        }
                        for id in expired {
                            entries.remove(&id);
                            order.lock().retain(|x| x != &id);
                        }
                    }
                }
            }
        });
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }
}

/// External key-value storage (Redis), keyed with a configurable prefix.
///
/// Each session occupies two keys: `{prefix}{id}` holding the serialized
/// document, and `{prefix}{id}:meta` holding `{created_at, last_activity,
/// ttl}` so expiry sweeps don't need to deserialize the full document.
pub struct RedisStorage {
    manager: redis::aio::ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisStorage {
    pub async fn connect(url: &str, key_prefix: impl Into<String>, ttl_seconds: u64) -> BridgeResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            key_prefix: key_prefix.into(),
            ttl_seconds,
        })
    }

    fn data_key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn meta_key(&self, id: &str) -> String {
        format!("{}{}:meta", self.key_prefix, id)
    }
}

#[async_trait]
impl SessionStorage for RedisStorage {
    async fn store(&self, id: &str, serialized: String) -> BridgeResult<()> {
        let mut conn = self.manager.clone();
        let now = Utc::now();
        let meta = Meta {
            created_at: now,
            last_activity: now,
        };
        let meta_json = serde_json::to_string(&meta)
            .map_err(|e| crate::error::BridgeError::Storage(e.to_string()))?;
        let _: () = conn
            .set_ex(self.data_key(id), serialized, self.ttl_seconds)
            .await?;
        let _: () = conn
            .set_ex(self.meta_key(id), meta_json, self.ttl_seconds)
            .await?;
        Ok(())
    }

    async fn retrieve(&self, id: &str, touch: bool) -> BridgeResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(self.data_key(id)).await?;
        if value.is_some() && touch {
            let _: Result<(), _> = conn.expire(self.data_key(id), self.ttl_seconds as i64).await;
            let _: Result<(), _> = conn.expire(self.meta_key(id), self.ttl_seconds as i64).await;
        }
        Ok(value)
    }

    async fn delete(&self, id: &str) -> BridgeResult<bool> {
        let mut conn = self.manager.clone();
        let deleted: i64 = conn.del(self.data_key(id)).await?;
        let _: i64 = conn.del(self.meta_key(id)).await?;
        Ok(deleted > 0)
    }

    async fn list_active(&self) -> BridgeResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", self.key_prefix);
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.ends_with(":meta"))
            .filter_map(|k| k.strip_prefix(&self.key_prefix).map(|s| s.to_string()))
            .collect())
    }

    async fn cleanup_expired(&self, max_age: Duration) -> BridgeResult<usize> {
        let ids = self.list_active().await?;
        let mut conn = self.manager.clone();
        let mut removed = 0;
        for id in ids {
            let meta_json: Option<String> = conn.get(self.meta_key(&id)).await?;
            let Some(meta_json) = meta_json else { continue };
            let Ok(meta) = serde_json::from_str::<Meta>(&meta_json) else {
                continue;
            };
            let age = Utc::now() - meta.last_activity;
            if age.to_std().unwrap_or(Duration::ZERO) > max_age {
                self.delete(&id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_store_and_retrieve_round_trips() {
        let storage = MemoryStorage::new(10, Duration::from_secs(60));
        storage.store("a", "payload".to_string()).await.unwrap();
        let got = storage.retrieve("a", true).await.unwrap();
        assert_eq!(got.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn memory_storage_evicts_lru_over_capacity() {
        let storage = MemoryStorage::new(2, Duration::from_secs(60));
        storage.store("a", "1".into()).await.unwrap();
        storage.store("b", "2".into()).await.unwrap();
        storage.store("c", "3".into()).await.unwrap();
        let active = storage.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(!active.contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn memory_storage_cleanup_expired_removes_old_entries() {
        let storage = MemoryStorage::new(10, Duration::from_secs(60));
        storage.store("a", "1".into()).await.unwrap();
        let removed = storage.cleanup_expired(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(storage.retrieve("a", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_storage_delete_removes_entry() {
        let storage = MemoryStorage::new(10, Duration::from_secs(60));
        storage.store("a", "1".into()).await.unwrap();
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
    }
}
