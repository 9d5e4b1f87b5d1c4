use crate::signal::Snapshot;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Time-bucketed snapshot cache sitting between the fetchers and the engine.
///
/// Key is `(symbol, unix_secs / ttl_secs)`: every caller asking for the same
/// symbol inside one bucket shares a single upstream response. Entries from
/// older buckets are evicted on insert. The lock is never held across an await.
pub struct SnapshotCache {
    ttl_secs: i64,
    entries: Mutex<HashMap<String, (i64, Arc<Snapshot>)>>,
}

impl SnapshotCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs: (ttl_secs.max(1)).min(i64::MAX as u64) as i64,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn bucket(&self, unix_secs: i64) -> i64 {
        unix_secs.div_euclid(self.ttl_secs)
    }

    pub fn get(&self, symbol: &str, unix_secs: i64) -> Option<Arc<Snapshot>> {
        let bucket = self.bucket(unix_secs);
        let entries = self.entries.lock().ok()?;
        entries
            .get(symbol)
            .filter(|(b, _)| *b == bucket)
            .map(|(_, snap)| Arc::clone(snap))
    }

    /// Stores `snapshot` for the bucket containing `unix_secs` and returns the shared handle.
    pub fn insert(&self, symbol: &str, unix_secs: i64, snapshot: Snapshot) -> Arc<Snapshot> {
        let bucket = self.bucket(unix_secs);
        let shared = Arc::new(snapshot);
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.retain(|_, (b, _)| *b >= bucket);
                entries.insert(symbol.to_string(), (bucket, Arc::clone(&shared)));
            }
            Err(e) => tracing::warn!("snapshot cache lock poisoned: {e}"),
        }
        shared
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(underlying: f64) -> Snapshot {
        Snapshot {
            underlying_value: Some(underlying),
            underlying_is_fallback: false,
            expiries: vec!["E1".into()],
            records: vec![],
        }
    }

    #[test]
    fn test_hit_within_bucket() {
        let cache = SnapshotCache::new(30);
        let stored = cache.insert("NIFTY", 60, snap(100.0));
        let hit = cache.get("NIFTY", 89).unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));
        assert!(cache.get("BANKNIFTY", 60).is_none());
    }

    #[test]
    fn test_miss_after_bucket_rolls() {
        let cache = SnapshotCache::new(30);
        cache.insert("NIFTY", 60, snap(100.0));
        assert!(cache.get("NIFTY", 90).is_none());
        assert!(cache.get("NIFTY", 59).is_none());
    }

    #[test]
    fn test_insert_evicts_stale_buckets() {
        let cache = SnapshotCache::new(10);
        cache.insert("NIFTY", 0, snap(1.0));
        cache.insert("BANKNIFTY", 5, snap(2.0));
        assert_eq!(cache.len(), 2);
        cache.insert("FINNIFTY", 25, snap(3.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("FINNIFTY", 29).unwrap().underlying_value, Some(3.0));
    }
}
