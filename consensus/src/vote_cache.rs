//! Vote cache: votes for blocks that have no election yet.
//!
//! Votes can arrive before the block they vote for, or before the scheduler
//! gets round to it. The cache keeps them per block hash, with a running
//! tally, so they can be replayed into the election when it starts and so
//! the hinted scheduler can spot blocks with heavy support.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use lattice_types::{Account, Amount, BlockHash, Vote};

use crate::config::VoteCacheConfig;

struct CachedVote {
    voter: Account,
    weight: Amount,
    vote: Arc<Vote>,
    arrived: Instant,
}

struct CacheEntry {
    votes: Vec<CachedVote>,
    tally: Amount,
    final_tally: Amount,
    last_update: Instant,
}

impl CacheEntry {
    fn recount(&mut self) {
        self.tally = self.votes.iter().map(|v| v.weight).sum();
        self.final_tally = self
            .votes
            .iter()
            .filter(|v| v.vote.is_final())
            .map(|v| v.weight)
            .sum();
    }
}

/// A hash with enough cached support to be worth an election.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopEntry {
    pub hash: BlockHash,
    pub tally: Amount,
    pub final_tally: Amount,
}

pub struct VoteCache {
    config: VoteCacheConfig,
    entries: HashMap<BlockHash, CacheEntry>,
    /// Arrival time index so expiry only visits old entries.
    time_index: BTreeMap<Instant, Vec<BlockHash>>,
}

impl VoteCache {
    pub fn new(config: VoteCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            time_index: BTreeMap::new(),
        }
    }

    /// Cache `vote` for each of its hashes accepted by `filter`.
    ///
    /// A voter appears once per hash; a newer timestamp replaces the held
    /// vote. When a hash has too many voters the lightest one makes room
    /// for a heavier newcomer.
    pub fn insert(
        &mut self,
        vote: &Arc<Vote>,
        weight: Amount,
        filter: impl Fn(&BlockHash) -> bool,
        now: Instant,
    ) {
        for hash in vote.hashes.iter().filter(|h| filter(h)) {
            self.insert_one(*hash, vote, weight, now);
        }
    }

    fn insert_one(&mut self, hash: BlockHash, vote: &Arc<Vote>, weight: Amount, now: Instant) {
        if !self.entries.contains_key(&hash) && self.entries.len() >= self.config.max_size {
            self.cleanup(now);
            if self.entries.len() >= self.config.max_size {
                self.evict_lightest();
            }
        }
        let max_voters = self.config.max_voters;
        let entry = self.entries.entry(hash).or_insert_with(|| CacheEntry {
            votes: Vec::new(),
            tally: Amount::ZERO,
            final_tally: Amount::ZERO,
            last_update: now,
        });

        if let Some(existing) = entry.votes.iter_mut().find(|v| v.voter == vote.voting_account) {
            if vote.timestamp > existing.vote.timestamp {
                existing.vote = Arc::clone(vote);
                existing.weight = weight;
                existing.arrived = now;
                entry.last_update = now;
                entry.recount();
                self.time_index.entry(now).or_default().push(hash);
            }
            return;
        }

        if entry.votes.len() >= max_voters {
            let lightest = entry
                .votes
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.weight)
                .map(|(i, v)| (i, v.weight));
            match lightest {
                Some((index, lightest_weight)) if weight > lightest_weight => {
                    entry.votes.swap_remove(index);
                }
                _ => return,
            }
        }

        entry.votes.push(CachedVote {
            voter: vote.voting_account,
            weight,
            vote: Arc::clone(vote),
            arrived: now,
        });
        entry.last_update = now;
        entry.recount();
        self.time_index.entry(now).or_default().push(hash);
    }

    /// Cached votes for `hash`, ready to be replayed into an election.
    pub fn find(&self, hash: &BlockHash) -> Vec<Arc<Vote>> {
        self.entries
            .get(hash)
            .map(|e| e.votes.iter().map(|v| Arc::clone(&v.vote)).collect())
            .unwrap_or_default()
    }

    pub fn erase(&mut self, hash: &BlockHash) -> bool {
        self.entries.remove(hash).is_some()
    }

    /// `(tally, final_tally)` for `hash`.
    pub fn tally(&self, hash: &BlockHash) -> (Amount, Amount) {
        self.entries
            .get(hash)
            .map(|e| (e.tally, e.final_tally))
            .unwrap_or_default()
    }

    /// Hashes whose tally reaches `min_tally`, heaviest first.
    pub fn top(&self, min_tally: Amount) -> Vec<TopEntry> {
        let mut top: Vec<TopEntry> = self
            .entries
            .iter()
            .filter(|(_, e)| e.tally >= min_tally)
            .map(|(hash, e)| TopEntry {
                hash: *hash,
                tally: e.tally,
                final_tally: e.final_tally,
            })
            .collect();
        top.sort_by(|a, b| b.tally.cmp(&a.tally).then(a.hash.cmp(&b.hash)));
        top
    }

    /// Drop votes older than the configured age.
    pub fn cleanup(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.config.age_cutoff()) else {
            return;
        };
        let expired: Vec<Instant> = self.time_index.range(..=cutoff).map(|(k, _)| *k).collect();
        let mut candidates = HashSet::new();
        for key in expired {
            if let Some(hashes) = self.time_index.remove(&key) {
                candidates.extend(hashes);
            }
        }
        for hash in candidates {
            let empty = match self.entries.get_mut(&hash) {
                Some(entry) => {
                    entry.votes.retain(|v| v.arrived > cutoff);
                    entry.recount();
                    entry.votes.is_empty()
                }
                None => false,
            };
            if empty {
                self.entries.remove(&hash);
            }
        }
    }

    fn evict_lightest(&mut self) {
        let lightest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.tally, e.last_update))
            .map(|(hash, _)| *hash);
        if let Some(hash) = lightest {
            self.entries.remove(&hash);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_votes(&self) -> usize {
        self.entries.values().map(|e| e.votes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hash(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    fn vote(rep: u8, timestamp: u64, hashes: Vec<BlockHash>) -> Arc<Vote> {
        Arc::new(Vote::new(Account::new([rep; 32]), timestamp, 0, hashes).unwrap())
    }

    fn final_vote(rep: u8, hashes: Vec<BlockHash>) -> Arc<Vote> {
        Arc::new(Vote::new_final(Account::new([rep; 32]), hashes).unwrap())
    }

    fn cache() -> VoteCache {
        VoteCache::new(VoteCacheConfig::default())
    }

    fn all(_: &BlockHash) -> bool {
        true
    }

    #[test]
    fn tallies_per_hash() {
        let mut cache = cache();
        let now = Instant::now();
        cache.insert(&vote(1, 0x10, vec![hash(1), hash(2)]), Amount::raw(100), all, now);
        cache.insert(&final_vote(2, vec![hash(1)]), Amount::raw(200), all, now);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.tally(&hash(1)), (Amount::raw(300), Amount::raw(200)));
        assert_eq!(cache.tally(&hash(2)), (Amount::raw(100), Amount::ZERO));
        assert_eq!(cache.find(&hash(1)).len(), 2);
    }

    #[test]
    fn newer_vote_from_same_voter_replaces() {
        let mut cache = cache();
        let now = Instant::now();
        cache.insert(&vote(1, 0x20, vec![hash(1)]), Amount::raw(100), all, now);
        cache.insert(&vote(1, 0x10, vec![hash(1)]), Amount::raw(500), all, now);
        assert_eq!(cache.tally(&hash(1)).0, Amount::raw(100));
        cache.insert(&final_vote(1, vec![hash(1)]), Amount::raw(100), all, now);
        assert_eq!(cache.total_votes(), 1);
        assert_eq!(cache.tally(&hash(1)), (Amount::raw(100), Amount::raw(100)));
    }

    #[test]
    fn filter_skips_hashes() {
        let mut cache = cache();
        cache.insert(
            &vote(1, 0x10, vec![hash(1), hash(2)]),
            Amount::raw(1),
            |h| *h == hash(2),
            Instant::now(),
        );
        assert!(cache.find(&hash(1)).is_empty());
        assert_eq!(cache.find(&hash(2)).len(), 1);
    }

    #[test]
    fn top_is_sorted_and_thresholded() {
        let mut cache = cache();
        let now = Instant::now();
        cache.insert(&vote(1, 0x10, vec![hash(1)]), Amount::raw(100), all, now);
        cache.insert(&vote(2, 0x10, vec![hash(2)]), Amount::raw(500), all, now);
        cache.insert(&vote(3, 0x10, vec![hash(3)]), Amount::raw(50), all, now);
        let top: Vec<BlockHash> = cache.top(Amount::raw(100)).into_iter().map(|e| e.hash).collect();
        assert_eq!(top, vec![hash(2), hash(1)]);
    }

    #[test]
    fn voter_limit_keeps_heaviest() {
        let mut cache = VoteCache::new(VoteCacheConfig {
            max_voters: 2,
            ..Default::default()
        });
        let now = Instant::now();
        cache.insert(&vote(1, 0x10, vec![hash(1)]), Amount::raw(10), all, now);
        cache.insert(&vote(2, 0x10, vec![hash(1)]), Amount::raw(20), all, now);
        cache.insert(&vote(3, 0x10, vec![hash(1)]), Amount::raw(5), all, now);
        assert_eq!(cache.tally(&hash(1)).0, Amount::raw(30));
        cache.insert(&vote(4, 0x10, vec![hash(1)]), Amount::raw(40), all, now);
        assert_eq!(cache.tally(&hash(1)).0, Amount::raw(60));
    }

    #[test]
    fn size_limit_evicts_lightest_entry() {
        let mut cache = VoteCache::new(VoteCacheConfig {
            max_size: 2,
            ..Default::default()
        });
        let now = Instant::now();
        cache.insert(&vote(1, 0x10, vec![hash(1)]), Amount::raw(10), all, now);
        cache.insert(&vote(1, 0x10, vec![hash(2)]), Amount::raw(20), all, now);
        cache.insert(&vote(1, 0x10, vec![hash(3)]), Amount::raw(30), all, now);
        assert_eq!(cache.len(), 2);
        assert!(cache.find(&hash(1)).is_empty());
    }

    #[test]
    fn cleanup_expires_old_votes() {
        let mut cache = cache();
        let now = Instant::now();
        cache.insert(&vote(1, 0x10, vec![hash(1)]), Amount::raw(10), all, now);
        let later = now + Duration::from_secs(60);
        cache.insert(&vote(2, 0x10, vec![hash(2)]), Amount::raw(10), all, later);
        cache.cleanup(now + VoteCacheConfig::default().age_cutoff() + Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.find(&hash(1)).is_empty());
    }

    #[test]
    fn erase_removes_entry() {
        let mut cache = cache();
        cache.insert(&vote(1, 0x10, vec![hash(1)]), Amount::raw(10), all, Instant::now());
        assert!(cache.erase(&hash(1)));
        assert!(!cache.erase(&hash(1)));
        assert!(cache.is_empty());
    }
}
