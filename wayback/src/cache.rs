//! TTL cache over the persisted store.

use crate::clock::Clock;
use crate::store::KvStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Prefix shared by every cache entry in the store.
pub const CACHE_PREFIX: &str = "cache_";

/// A logical group of cache entries sharing one time-to-live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub name: &'static str,
    pub ttl: Duration,
}

impl Namespace {
    pub const fn new(name: &'static str, ttl: Duration) -> Self {
        Self { name, ttl }
    }

    fn prefix(&self) -> String {
        format!("{CACHE_PREFIX}{}_", self.name)
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Milliseconds since the Unix epoch at which the value was stored.
    timestamp: i64,
    value: Value,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Looks up `key` in `namespace`.
    ///
    /// Returns `None` when `bypass` is set, when nothing is stored, when the
    /// entry is older than the namespace TTL, or when the stored entry cannot
    /// be decoded as a `T`.
    pub fn get<T: DeserializeOwned>(
        &self,
        namespace: &Namespace,
        key: &str,
        bypass: bool,
    ) -> Option<T> {
        if bypass {
            tracing::trace!(namespace = namespace.name, key, "cache bypassed");
            return None;
        }

        let store_key = namespace.store_key(key);
        let raw = self.store.get(&store_key)?;
        let entry: CacheEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(key = %store_key, error = %e, "unreadable cache entry");
                return None;
            }
        };

        if !self.is_fresh(namespace, &entry) {
            tracing::debug!(key = %store_key, "cache entry expired");
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                tracing::debug!(key = %store_key, "cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::debug!(key = %store_key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Stores `value` under `key`, stamped with the current time.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &T,
    ) -> eyre::Result<()> {
        let entry = CacheEntry {
            timestamp: self.clock.now().as_millisecond(),
            value: serde_json::to_value(value)?,
        };
        self.store
            .set(&namespace.store_key(key), serde_json::to_value(entry)?)
    }

    /// Deletes every cache entry whose key (after the cache prefix) starts
    /// with `prefix`. An empty prefix clears the whole cache.
    pub fn clear(&self, prefix: &str) -> eyre::Result<usize> {
        let removed = self.store.delete_prefix(&format!("{CACHE_PREFIX}{prefix}"))?;
        tracing::info!(prefix, removed, "cleared cache entries");
        Ok(removed)
    }

    /// Deletes entries of the given namespaces that are past their TTL or
    /// cannot be decoded.
    pub fn purge_expired(&self, namespaces: &[&Namespace]) -> eyre::Result<usize> {
        let mut removed = 0;
        for key in self.store.keys() {
            let Some(namespace) = namespaces.iter().find(|ns| key.starts_with(&ns.prefix())) else {
                continue;
            };
            let keep = self
                .store
                .get(&key)
                .and_then(|raw| serde_json::from_value::<CacheEntry>(raw).ok())
                .is_some_and(|entry| self.is_fresh(namespace, &entry));
            if !keep {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        tracing::debug!(removed, "purged expired cache entries");
        Ok(removed)
    }

    fn is_fresh(&self, namespace: &Namespace, entry: &CacheEntry) -> bool {
        let age_ms = self.clock.now().as_millisecond() - entry.timestamp;
        i128::from(age_ms) < namespace.ttl.as_millis() as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use jiff::{SignedDuration, Timestamp};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LISTINGS: Namespace = Namespace::new("channel", Duration::from_secs(2 * 60 * 60));
    const SEARCHES: Namespace = Namespace::new("search", Duration::from_secs(60));

    fn setup() -> (Arc<ManualClock>, Arc<MemoryStore>, CacheStore) {
        let clock = Arc::new(ManualClock::new(
            "2011-06-15T12:00:00Z".parse::<Timestamp>().unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let cache = CacheStore::new(store.clone(), clock.clone());
        (clock, store, cache)
    }

    #[test]
    fn round_trip_until_ttl() {
        let (clock, _, cache) = setup();
        let value = vec!["a".to_string(), "b".to_string()];
        cache.set(&LISTINGS, "UC123_2011-06-15", &value).unwrap();

        clock.advance(SignedDuration::from_mins(119));
        assert_eq!(
            cache.get::<Vec<String>>(&LISTINGS, "UC123_2011-06-15", false),
            Some(value)
        );

        clock.advance(SignedDuration::from_mins(1));
        assert_eq!(cache.get::<Vec<String>>(&LISTINGS, "UC123_2011-06-15", false), None);
    }

    #[test]
    fn bypass_forces_miss() {
        let (_, _, cache) = setup();
        cache.set(&LISTINGS, "k", &42u32).unwrap();
        assert_eq!(cache.get::<u32>(&LISTINGS, "k", true), None);
        assert_eq!(cache.get::<u32>(&LISTINGS, "k", false), Some(42));
    }

    #[test]
    fn set_overwrites_and_restamps() {
        let (clock, _, cache) = setup();
        cache.set(&SEARCHES, "q", &1u32).unwrap();
        clock.advance(SignedDuration::from_secs(50));
        cache.set(&SEARCHES, "q", &2u32).unwrap();
        clock.advance(SignedDuration::from_secs(50));
        assert_eq!(cache.get::<u32>(&SEARCHES, "q", false), Some(2));
    }

    #[test]
    fn garbage_reads_as_absent() {
        let (_, store, cache) = setup();
        store.set("cache_channel_bad", json!("not an entry")).unwrap();
        store
            .set("cache_channel_shape", json!({"timestamp": i64::MAX, "value": "str"}))
            .unwrap();
        assert_eq!(cache.get::<u32>(&LISTINGS, "bad", false), None);
        assert_eq!(cache.get::<u32>(&LISTINGS, "shape", false), None);
    }

    #[test]
    fn clear_by_prefix() {
        let (_, store, cache) = setup();
        cache.set(&LISTINGS, "a", &1u32).unwrap();
        cache.set(&SEARCHES, "b", &2u32).unwrap();
        store.set("api_keys", json!([])).unwrap();

        assert_eq!(cache.clear("search").unwrap(), 1);
        assert_eq!(cache.get::<u32>(&LISTINGS, "a", false), Some(1));

        assert_eq!(cache.clear("").unwrap(), 1);
        assert_eq!(store.keys(), vec!["api_keys".to_string()]);
    }

    #[test]
    fn purge_drops_only_stale_entries() {
        let (clock, store, cache) = setup();
        cache.set(&LISTINGS, "long", &1u32).unwrap();
        cache.set(&SEARCHES, "short", &2u32).unwrap();
        clock.advance(SignedDuration::from_mins(5));

        assert_eq!(cache.purge_expired(&[&LISTINGS, &SEARCHES]).unwrap(), 1);
        assert_eq!(store.keys(), vec!["cache_channel_long".to_string()]);
    }
}
