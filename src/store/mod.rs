pub mod redis;

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::config::{ResultsBackend, ResultsConfig};

use self::redis::RedisStore;

// Batch-wide counters and time series shared by all workers. Only atomic
// operations are exposed; callers never read-modify-write.
//
// Key layout matches the original dashboard: integer counters are stored
// under "int_<name>", the per-minute message arrival series under
// "ts_<minute timestamp>", and free-form markers under their bare name.
pub enum ResultStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl ResultStore {
    pub async fn open(config: &ResultsConfig) -> crate::config::Result<Self> {
        match config.backend {
            ResultsBackend::Memory => Ok(ResultStore::Memory(MemoryStore::default())),
            ResultsBackend::Redis => RedisStore::open(&config.url, &config.namespace)
                .await
                .map(ResultStore::Redis),
        }
    }

    pub async fn increment(&self, name: &str) {
        match self {
            ResultStore::Memory(store) => store.increment(&format!("int_{name}")),
            ResultStore::Redis(store) => store.increment(&format!("int_{name}")).await,
        }
    }

    pub async fn get_int(&self, name: &str) -> i64 {
        match self {
            ResultStore::Memory(store) => store.get_int(&format!("int_{name}")),
            ResultStore::Redis(store) => store.get_int(&format!("int_{name}")).await,
        }
    }

    pub async fn set_text(&self, key: &str, value: &str, ttl: Option<Duration>) {
        match self {
            ResultStore::Memory(store) => store.set_text(key, value),
            ResultStore::Redis(store) => store.set_text(key, value, ttl).await,
        }
    }

    pub async fn get_text(&self, key: &str) -> Option<String> {
        match self {
            ResultStore::Memory(store) => store.get_text(key),
            ResultStore::Redis(store) => store.get_text(key).await,
        }
    }

    // Bump the arrival count for the minute containing `timestamp`
    pub async fn increment_ts(&self, timestamp: u64) {
        let minute = timestamp / 60 * 60;
        match self {
            ResultStore::Memory(store) => store.increment(&format!("ts_{minute}")),
            ResultStore::Redis(store) => store.increment(&format!("ts_{minute}")).await,
        }
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        match self {
            ResultStore::Memory(store) => store.scan_prefix(prefix),
            ResultStore::Redis(store) => store.scan_prefix(prefix).await,
        }
    }

    // Retention trim for the arrival time series
    pub async fn delete_ts_older_than(&self, cutoff: u64) {
        for key in self.scan_prefix("ts_").await {
            let expired = key
                .strip_prefix("ts_")
                .and_then(|ts| ts.parse::<u64>().ok())
                .map_or(true, |ts| ts < cutoff);
            if expired {
                match self {
                    ResultStore::Memory(store) => store.delete(&key),
                    ResultStore::Redis(store) => store.delete(&key).await,
                }
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    counters: DashMap<String, AtomicI64>,
    texts: DashMap<String, String>,
}

impl MemoryStore {
    fn increment(&self, key: &str) {
        if let Some(counter) = self.counters.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters
                .entry(key.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn get_int(&self, key: &str) -> i64 {
        self.counters
            .get(key)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    // TTLs are meaningless for a store that lives for one run only
    fn set_text(&self, key: &str, value: &str) {
        self.texts.insert(key.to_string(), value.to_string());
    }

    fn get_text(&self, key: &str) -> Option<String> {
        self.texts.get(key).map(|value| value.clone())
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        self.counters
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.texts.iter().map(|entry| entry.key().clone()))
            .filter(|key| key.starts_with(prefix))
            .collect()
    }

    fn delete(&self, key: &str) {
        self.counters.remove(key);
        self.texts.remove(key);
    }
}
