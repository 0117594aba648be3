use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Fallible dedup contract the pipeline is written against. The in-process
/// cache below cannot fail, but a shared backend can, and the caller must
/// fail open on an error: processing a message twice beats losing it.
pub trait DedupCache: Send + Sync {
    /// Records the id and reports whether it was fresh.
    fn mark_seen(&self, id: &str, now: Instant) -> anyhow::Result<bool>;
}

/// Expiring set of recently-seen external message ids. Delivery retries from
/// the gateway hit this before anything else in the pipeline.
///
/// Purging is left to the periodic sweeper so lookups stay O(1) on the hot
/// path. Memory is bounded by the TTL window.
pub struct DeduplicationCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DeduplicationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Records the id and reports whether it was fresh. Returns `false` for
    /// an id already seen inside the TTL window; an expired entry counts as
    /// fresh again and re-arms its TTL.
    pub fn mark_seen(&self, id: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock();
        match seen.get(id) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                seen.insert(id.to_string(), now);
                true
            }
        }
    }

    pub fn seen(&self, id: &str, now: Instant) -> bool {
        self.seen
            .lock()
            .get(id)
            .is_some_and(|at| now.duration_since(*at) < self.ttl)
    }

    /// Drops expired entries. Called from the sweeper loop, never inline.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        before - seen.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

impl DedupCache for DeduplicationCache {
    fn mark_seen(&self, id: &str, now: Instant) -> anyhow::Result<bool> {
        Ok(DeduplicationCache::mark_seen(self, id, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_delivery_within_ttl_is_rejected() {
        let cache = DeduplicationCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        assert!(cache.mark_seen("wamid.1", t0));
        assert!(!cache.mark_seen("wamid.1", t0 + Duration::from_secs(299)));
    }

    #[test]
    fn expired_id_is_fresh_again() {
        let cache = DeduplicationCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        assert!(cache.mark_seen("wamid.1", t0));
        assert!(cache.mark_seen("wamid.1", t0 + Duration::from_secs(301)));
    }

    #[test]
    fn distinct_ids_do_not_collide() {
        let cache = DeduplicationCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        assert!(cache.mark_seen("wamid.1", t0));
        assert!(cache.mark_seen("wamid.2", t0));
    }

    #[test]
    fn sweep_purges_only_expired_entries() {
        let cache = DeduplicationCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        cache.mark_seen("old", t0);
        cache.mark_seen("new", t0 + Duration::from_secs(200));

        let removed = cache.sweep(t0 + Duration::from_secs(301));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.seen("new", t0 + Duration::from_secs(301)));
    }
}
