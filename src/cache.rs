use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::debug;

use crate::models::SourceType;
use crate::source::{DataSource, FetchParams};

pub const DEFAULT_TTL_SECS: i64 = 3600;
pub const DEFAULT_CAPACITY: usize = 256;

/// Payloads are cached per source type, canonical parameters and UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_type: SourceType,
    pub params: String,
    pub day: NaiveDate,
}

impl CacheKey {
    pub fn new(source_type: SourceType, params: &FetchParams, now: DateTime<Utc>) -> Self {
        Self {
            source_type,
            params: params.canonical(),
            day: now.date_naive(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Bounded map with a per-entry expiry. Expired entries are dropped lazily on
/// read or by `sweep`; a full cache evicts the entry closest to expiring.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get_at(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert_at(&mut self, key: CacheKey, value: V, now: DateTime<Utc>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.sweep(now);
            if self.entries.len() >= self.capacity {
                self.evict_soonest_expiring();
            }
        }

        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    fn evict_soonest_expiring(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

/// Wraps a data source so repeated fetches within the TTL are served from
/// memory.
pub struct CachedSource<S> {
    inner: S,
    cache: Mutex<TtlCache<Value>>,
}

impl<S: DataSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(TtlCache::new(ttl, capacity)),
        }
    }

    pub fn cached_entries(&self) -> anyhow::Result<usize> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("payload cache lock poisoned"))?;
        Ok(cache.len())
    }
}

impl<S: DataSource> DataSource for CachedSource<S> {
    fn fetch(&self, source_type: SourceType, params: &FetchParams) -> anyhow::Result<Value> {
        let now = Utc::now();
        let key = CacheKey::new(source_type, params, now);
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("payload cache lock poisoned"))?;

        if let Some(payload) = cache.get_at(&key, now) {
            debug!(%source_type, params = %key.params, "payload cache hit");
            return Ok(payload);
        }

        let payload = self.inner.fetch(source_type, params)?;
        cache.insert_at(key, payload.clone(), now);
        Ok(payload)
    }
}
