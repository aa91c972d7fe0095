use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local store for in-flight WebAuthn ceremony state.
///
/// Entries are taken (removed) on use and expire after the TTL; a
/// background sweep purges abandoned ceremonies so the map stays
/// bounded. A verify that finds nothing simply fails the ceremony,
/// so the sweep can never race destructively with an in-flight call.
#[derive(Clone)]
pub struct ChallengeCache {
    entries: Arc<DashMap<String, ChallengeEntry>>,
    ttl: Duration,
}

#[derive(Clone)]
struct ChallengeEntry {
    value: String,
    inserted_utc: DateTime<Utc>,
}

impl ChallengeCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: String) {
        self.entries.insert(
            key.into(),
            ChallengeEntry {
                value,
                inserted_utc: Utc::now(),
            },
        );
    }

    /// Remove and return the entry under `key`. Entries past their TTL
    /// are discarded and reported as absent.
    pub fn take(&self, key: &str) -> Option<String> {
        let (_, entry) = self.entries.remove(key)?;
        if Utc::now() - entry.inserted_utc > self.ttl {
            return None;
        }
        Some(entry.value)
    }

    /// Purge every entry older than the TTL.
    pub fn sweep(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now - entry.inserted_utc <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the sweep on a fixed interval in the background. The only
    /// background task in this service.
    pub fn start_sweeper(&self, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                cache.sweep();
                tracing::debug!(entries = cache.len(), "Challenge cache swept");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_one_time() {
        let cache = ChallengeCache::new(300);
        cache.insert("reg:alice", "state".to_string());

        assert_eq!(cache.take("reg:alice").as_deref(), Some("state"));
        assert!(cache.take("reg:alice").is_none());
    }

    #[test]
    fn test_expired_entry_is_not_returned() {
        let cache = ChallengeCache::new(0);
        cache.insert("reg:alice", "state".to_string());
        // TTL of zero: anything older than "now" is expired.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.take("reg:alice").is_none());
    }

    #[test]
    fn test_sweep_purges_stale_entries() {
        let cache = ChallengeCache::new(0);
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());
        std::thread::sleep(std::time::Duration::from_millis(5));

        cache.sweep();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let cache = ChallengeCache::new(300);
        cache.insert("a", "1".to_string());
        cache.sweep();
        assert_eq!(cache.len(), 1);
    }
}
