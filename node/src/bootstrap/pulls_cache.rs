//! Resume points of interrupted pulls.
//!
//! A long pull that fails part way is remembered by its original target.
//! When the same pull is queued again it resumes from the last block
//! received instead of starting over at the peer's head.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use lattice_types::{BlockHash, HashOrAccount};

use super::pull::PullInfo;

/// Pulls that processed fewer blocks than this are cheap to repeat.
const MIN_PROCESSED: u64 = 500;

type Key = (HashOrAccount, BlockHash);

struct CachedPull {
    time: Instant,
    new_head: BlockHash,
}

pub struct PullsCache {
    max_size: usize,
    by_key: HashMap<Key, CachedPull>,
    by_time: BTreeMap<(Instant, Key), ()>,
}

impl PullsCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            by_key: HashMap::new(),
            by_time: BTreeMap::new(),
        }
    }

    fn key(pull: &PullInfo) -> Key {
        (pull.account_or_head, pull.head_original)
    }

    /// Remember how far `pull` got.
    pub fn add(&mut self, pull: &PullInfo, now: Instant) {
        if pull.processed <= MIN_PROCESSED {
            return;
        }
        let key = Self::key(pull);
        if let Some(existing) = self.by_key.get_mut(&key) {
            self.by_time.remove(&(existing.time, key));
            existing.time = now;
            existing.new_head = pull.head;
            self.by_time.insert((now, key), ());
            return;
        }
        while self.by_key.len() >= self.max_size {
            let Some(((_, oldest), _)) = self.by_time.pop_first() else {
                break;
            };
            self.by_key.remove(&oldest);
        }
        self.by_key.insert(
            key,
            CachedPull {
                time: now,
                new_head: pull.head,
            },
        );
        self.by_time.insert((now, key), ());
    }

    /// Move `pull` to its cached resume point, if any.
    pub fn update_pull(&self, pull: &mut PullInfo) {
        if let Some(cached) = self.by_key.get(&Self::key(pull)) {
            pull.head = cached.new_head;
        }
    }

    pub fn remove(&mut self, pull: &PullInfo) {
        let key = Self::key(pull);
        if let Some(cached) = self.by_key.remove(&key) {
            self.by_time.remove(&(cached.time, key));
        }
    }

    pub fn contains(&self, pull: &PullInfo) -> bool {
        self.by_key.contains_key(&Self::key(pull))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Account;
    use std::time::Duration;

    fn pull(account: u8, processed: u64) -> PullInfo {
        let mut pull = PullInfo::new(
            Account::new([account; 32]).into(),
            BlockHash::new([account; 32]),
            BlockHash::ZERO,
            0,
            0,
            4,
        );
        pull.processed = processed;
        pull
    }

    #[test]
    fn short_pulls_are_not_cached() {
        let mut cache = PullsCache::new(10);
        cache.add(&pull(1, 10), Instant::now());
        assert!(cache.is_empty());
    }

    #[test]
    fn repeated_pull_resumes_from_cached_head() {
        let mut cache = PullsCache::new(10);
        let mut interrupted = pull(1, 1000);
        interrupted.head = BlockHash::new([9; 32]);
        cache.add(&interrupted, Instant::now());

        let mut again = pull(1, 0);
        cache.update_pull(&mut again);
        assert_eq!(again.head, BlockHash::new([9; 32]));
        assert_eq!(again.head_original, BlockHash::new([1; 32]));

        cache.remove(&again);
        assert!(!cache.contains(&again));
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let mut cache = PullsCache::new(2);
        let start = Instant::now();
        for i in 1..=3u8 {
            cache.add(&pull(i, 1000), start + Duration::from_millis(i as u64));
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&pull(1, 0)));
        assert!(cache.contains(&pull(3, 0)));
    }
}
