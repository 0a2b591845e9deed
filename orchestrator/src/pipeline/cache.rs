//! Size- and TTL-bounded result cache: LRU on overflow, age on sweep.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use super::CommandResult;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Entry {
    result: CommandResult,
    stored_at: Instant,
}

pub struct ResultCache {
    entries: Mutex<LruCache<String, Entry>>,
    stats: Mutex<CacheStats>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
            ttl,
        }
    }

    pub fn get(&self, command_id: &str) -> Option<CommandResult> {
        let mut entries = self.entries.lock().expect("cache lock");
        let mut stats = self.stats.lock().expect("cache stats lock");
        match entries.get(command_id) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                stats.hits += 1;
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.pop(command_id);
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, result: CommandResult) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries.put(
            result.command_id.clone(),
            Entry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop entries past their TTL.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.pop(id);
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache lock").clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().expect("cache lock");
        let mut stats = *self.stats.lock().expect("cache stats lock");
        stats.entries = entries.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_returns_the_same_result() {
        let cache = ResultCache::new(8, Duration::from_secs(60));
        let result = CommandResult::success("c-1", "done");
        cache.put(result.clone());
        assert_eq!(cache.get("c-1"), Some(result));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = ResultCache::new(8, Duration::from_millis(10));
        cache.put(CommandResult::success("c-1", "done"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("c-1").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put(CommandResult::success("a", "1"));
        cache.put(CommandResult::success("b", "2"));
        cache.get("a");
        cache.put(CommandResult::success("c", "3"));
        assert!(cache.get("a").is_some(), "recently used survives");
        assert!(cache.get("b").is_none(), "lru entry evicted");
    }

    #[test]
    fn sweep_removes_only_aged_entries() {
        let cache = ResultCache::new(8, Duration::from_millis(20));
        cache.put(CommandResult::success("old", "1"));
        std::thread::sleep(Duration::from_millis(40));
        cache.put(CommandResult::success("new", "2"));
        assert_eq!(cache.sweep(), 1);
        assert!(cache.get("new").is_some());
    }
}
