//! In-memory TTL cache with background refresh
//!
//! An entry younger than `ttl * refresh_ratio` is served as is. Past that
//! point it is still served, but a single background task reloads it.
//! Entries older than `ttl` are reloaded before returning.
//!
//! `invalidate` bumps a per-key generation. A load that started under an
//! older generation is returned to its caller but never stored.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Usable, but due for a background refresh.
    Stale,
    Expired,
}

pub fn freshness(age: Duration, ttl: Duration, refresh_ratio: f64) -> Freshness {
    if age >= ttl {
        Freshness::Expired
    } else if age >= ttl.mul_f64(refresh_ratio.clamp(0.0, 1.0)) {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

struct Entry<V> {
    value: V,
    loaded_at: Instant,
}

struct Slots<K, V> {
    entries: HashMap<K, Entry<V>>,
    generations: HashMap<K, u64>,
}

impl<K: Eq + Hash, V> Slots<K, V> {
    fn generation(&self, key: &K) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    refresh_ratio: f64,
    slots: RwLock<Slots<K, V>>,
    refreshing: Mutex<HashSet<K>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, refresh_ratio: f64) -> Self {
        Self {
            ttl,
            refresh_ratio,
            slots: RwLock::new(Slots {
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    /// Return the cached value for `key`, calling `loader` when it is
    /// missing or expired.
    pub async fn get_or_load<F, Fut, E>(self: &Arc<Self>, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (cached, generation) = {
            let slots = self.slots.read().await;
            let cached = slots
                .entries
                .get(&key)
                .map(|e| (e.value.clone(), freshness(e.loaded_at.elapsed(), self.ttl, self.refresh_ratio)));
            (cached, slots.generation(&key))
        };

        match cached {
            Some((value, Freshness::Fresh)) => Ok(value),
            Some((value, Freshness::Stale)) => {
                self.spawn_refresh(key, generation, loader).await;
                Ok(value)
            }
            Some((_, Freshness::Expired)) | None => {
                let value = loader().await?;
                self.store(key, generation, value.clone()).await;
                Ok(value)
            }
        }
    }

    async fn spawn_refresh<F, Fut, E>(self: &Arc<Self>, key: K, generation: u64, loader: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if !self.refreshing.lock().await.insert(key.clone()) {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            match loader().await {
                Ok(value) => {
                    cache.store(key.clone(), generation, value).await;
                }
                Err(e) => tracing::warn!("Background cache refresh failed: {}", e),
            }
            cache.refreshing.lock().await.remove(&key);
        });
    }

    /// Store a loaded value unless `key` was invalidated since the load began.
    async fn store(&self, key: K, generation: u64, value: V) -> bool {
        let mut slots = self.slots.write().await;
        if slots.generation(&key) != generation {
            tracing::debug!("Dropping cache load that raced an invalidation");
            return false;
        }
        slots.entries.insert(
            key,
            Entry {
                value,
                loaded_at: Instant::now(),
            },
        );
        true
    }

    pub async fn invalidate(&self, key: &K) {
        let mut slots = self.slots.write().await;
        slots.entries.remove(key);
        *slots.generations.entry(key.clone()).or_insert(0) += 1;
    }
}
