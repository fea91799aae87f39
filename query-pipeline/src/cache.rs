use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// The single expiry predicate, shared by the get path and the sweeper.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub expired: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// In-memory TTL cache for answered queries. Mutations serialize through
/// one `RwLock`; counters are atomics so `stats` never takes the write
/// lock.
pub struct ResponseCache {
    entries: tokio::sync::RwLock<HashMap<String, CacheEntry>>,
    counters: CacheCounters,
    default_ttl: Duration,
    max_entries: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS), DEFAULT_MAX_ENTRIES)
    }
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        ResponseCache {
            entries: tokio::sync::RwLock::new(HashMap::new()),
            counters: CacheCounters::default(),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Stable key over positional parts plus keyword parts. Keyword parts
    /// are sorted by name first, so argument order never changes the key.
    pub fn generate_key(parts: &[&str], kwargs: &[(&str, &str)]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }

        let mut sorted: Vec<&(&str, &str)> = kwargs.iter().collect();
        sorted.sort_by_key(|(name, _)| *name);
        for (name, value) in sorted {
            hasher.update(name.as_bytes());
            hasher.update([0x1e]);
            hasher.update(value.as_bytes());
            hasher.update([0x1f]);
        }

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// A hit clones the stored value. An expired entry is deleted here and
    /// counted as a miss, never as a hit followed by a miss.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Utc::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Lazy expiry: upgrade to the write lock and re-check.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(now) {
                entries.remove(key);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            Self::evict_oldest(&mut entries, self.max_entries);
        }

        entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                created_at: now,
                expires_at,
            },
        );
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Bulk eviction of the oldest 20% by creation time. Amortized and
    /// imprecise on purpose; strict LRU is not worth the bookkeeping here.
    fn evict_oldest(entries: &mut HashMap<String, CacheEntry>, max_entries: usize) {
        let evict_count = (max_entries / 5).max(1);
        let mut by_age: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        for (key, _) in by_age.into_iter().take(evict_count) {
            entries.remove(&key);
        }
        debug!(evicted = evict_count, "cache evicted oldest entries");
    }

    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn exists(&self, key: &str) -> bool {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Snapshot of the counters. No side effects on the entry map.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await.len();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let requests = hits + misses;
        let hit_rate = if requests == 0 {
            0.0
        } else {
            hits as f64 / requests as f64
        };

        CacheStats {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            entries,
            hit_rate,
        }
    }

    /// Removes every expired entry inside one write-lock critical section.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.counters
                .expired
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "cache sweep removed expired entries");
        }
    }
}

/// Handle to the background sweeper; `shutdown` cancels the task and
/// waits for it to stop.
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

pub fn spawn_sweeper(cache: Arc<ResponseCache>, interval: Duration) -> SweeperHandle {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = task_token.cancelled() => break,
                _ = ticker.tick() => cache.sweep().await,
            }
        }
    });

    SweeperHandle { token, task }
}
