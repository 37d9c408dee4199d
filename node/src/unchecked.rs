//! Blocks waiting for a dependency.
//!
//! A block whose previous, source or account is missing is parked here under
//! that dependency. When the dependency is processed, [`UncheckedMap::trigger`]
//! hands every waiting block back to the block processor.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lattice_types::{Block, BlockHash, HashOrAccount};
use lattice_utils::{DetailType, StatType, Stats};

/// `(dependency, block hash)`: several blocks may wait on one dependency.
type Key = (HashOrAccount, BlockHash);

#[derive(Clone, Debug)]
pub struct UncheckedEntry {
    pub block: Block,
    pub arrival: Instant,
}

#[derive(Default)]
struct Entries {
    by_key: BTreeMap<Key, (u64, UncheckedEntry)>,
    /// Insertion order, used to evict the oldest entry.
    by_sequence: BTreeMap<u64, Key>,
    next_sequence: u64,
}

impl Entries {
    fn remove(&mut self, key: &Key) -> Option<UncheckedEntry> {
        let (sequence, entry) = self.by_key.remove(key)?;
        self.by_sequence.remove(&sequence);
        Some(entry)
    }
}

pub struct UncheckedMap {
    max_size: usize,
    stats: std::sync::Arc<Stats>,
    entries: Mutex<Entries>,
}

impl UncheckedMap {
    pub fn new(max_size: usize, stats: std::sync::Arc<Stats>) -> Self {
        Self {
            max_size,
            stats,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Park `block` until `dependency` shows up. Returns false if the same
    /// block already waits on the same dependency.
    pub fn put(&self, dependency: HashOrAccount, block: Block, now: Instant) -> bool {
        let key = (dependency, block.hash());
        let mut entries = self.entries.lock().unwrap();
        if entries.by_key.contains_key(&key) {
            return false;
        }
        let sequence = entries.next_sequence;
        entries.next_sequence += 1;
        entries.by_key.insert(key, (sequence, UncheckedEntry { block, arrival: now }));
        entries.by_sequence.insert(sequence, key);
        let mut evicted = 0;
        while entries.by_key.len() > self.max_size {
            let Some((_, oldest)) = entries.by_sequence.pop_first() else {
                break;
            };
            entries.by_key.remove(&oldest);
            evicted += 1;
        }
        drop(entries);
        self.stats.inc(StatType::Unchecked, DetailType::Put);
        self.stats.add(StatType::Unchecked, DetailType::Evicted, evicted);
        true
    }

    /// Remove and return every block waiting on `dependency`.
    pub fn trigger(&self, dependency: &HashOrAccount) -> Vec<Block> {
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<Key> = entries
            .by_key
            .range((*dependency, BlockHash::ZERO)..)
            .take_while(|((dep, _), _)| dep == dependency)
            .map(|(key, _)| *key)
            .collect();
        let blocks: Vec<Block> = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .map(|entry| entry.block)
            .collect();
        drop(entries);
        self.stats
            .add(StatType::Unchecked, DetailType::Satisfied, blocks.len() as u64);
        blocks
    }

    /// Drop entries that arrived more than `cutoff` before `now`.
    pub fn cleanup(&self, now: Instant, cutoff: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let mut removed = 0;
        // Sequence order is arrival order, so the expired entries are a prefix.
        while let Some((&sequence, &key)) = entries.by_sequence.first_key_value() {
            let expired = entries
                .by_key
                .get(&key)
                .map(|(_, entry)| now.saturating_duration_since(entry.arrival) > cutoff)
                .unwrap_or(true);
            if !expired {
                break;
            }
            entries.by_sequence.remove(&sequence);
            entries.by_key.remove(&key);
            removed += 1;
        }
        drop(entries);
        self.stats
            .add(StatType::Unchecked, DetailType::Expired, removed as u64);
        removed
    }

    pub fn exists(&self, dependency: &HashOrAccount, hash: &BlockHash) -> bool {
        self.entries
            .lock()
            .unwrap()
            .by_key
            .contains_key(&(*dependency, *hash))
    }

    /// Every entry waiting on `dependency`.
    pub fn get(&self, dependency: &HashOrAccount) -> Vec<UncheckedEntry> {
        self.entries
            .lock()
            .unwrap()
            .by_key
            .range((*dependency, BlockHash::ZERO)..)
            .take_while(|((dep, _), _)| dep == dependency)
            .map(|(_, (_, entry))| entry.clone())
            .collect()
    }

    pub fn clear(&self) {
        *self.entries.lock().unwrap() = Entries::default();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
