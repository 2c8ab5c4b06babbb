//! In-memory TTL cache for forge lookups that are expensive and
//! change rarely, like organization membership.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<V: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Half an hour, enough to coalesce the bursts of hook deliveries a
    /// busy pull request produces.
    pub fn with_default_ttl() -> Self {
        TtlCache::new(Duration::from_secs(30 * 60))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.into(), (Instant::now(), value));
    }

    pub fn get_or_insert_with<E>(
        &self,
        key: &str,
        fill: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fill()?;
        self.put(key, value.clone());
        Ok(value)
    }
}
