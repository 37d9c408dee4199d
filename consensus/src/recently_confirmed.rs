//! Bounded FIFO of recently confirmed (root, winner) pairs.
//!
//! Late votes for these hashes are replays and the roots cannot be
//! re-elected while they are held.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use lattice_types::{BlockHash, QualifiedRoot};

#[derive(Default)]
struct Entries {
    order: VecDeque<(QualifiedRoot, BlockHash)>,
    by_root: HashMap<QualifiedRoot, BlockHash>,
    by_hash: HashMap<BlockHash, QualifiedRoot>,
}

pub struct RecentlyConfirmed {
    max_size: usize,
    entries: Mutex<Entries>,
}

impl RecentlyConfirmed {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Returns false if the root was already present.
    pub fn put(&self, root: QualifiedRoot, hash: BlockHash) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.by_root.contains_key(&root) || entries.by_hash.contains_key(&hash) {
            return false;
        }
        entries.order.push_back((root, hash));
        entries.by_root.insert(root, hash);
        entries.by_hash.insert(hash, root);
        if entries.order.len() > self.max_size {
            if let Some((old_root, old_hash)) = entries.order.pop_front() {
                entries.by_root.remove(&old_root);
                entries.by_hash.remove(&old_hash);
            }
        }
        true
    }

    pub fn root_exists(&self, root: &QualifiedRoot) -> bool {
        self.entries.lock().unwrap().by_root.contains_key(root)
    }

    pub fn hash_exists(&self, hash: &BlockHash) -> bool {
        self.entries.lock().unwrap().by_hash.contains_key(hash)
    }

    pub fn erase(&self, hash: &BlockHash) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(root) = entries.by_hash.remove(hash) {
            entries.by_root.remove(&root);
            entries.order.retain(|(_, h)| h != hash);
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.order.clear();
        entries.by_root.clear();
        entries.by_hash.clear();
    }

    pub fn back(&self) -> Option<(QualifiedRoot, BlockHash)> {
        self.entries.lock().unwrap().order.back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Root;

    fn entry(n: u8) -> (QualifiedRoot, BlockHash) {
        (
            QualifiedRoot::new(Root::new([n; 32]), BlockHash::new([n; 32])),
            BlockHash::new([n + 100; 32]),
        )
    }

    #[test]
    fn lookups_by_root_and_hash() {
        let recent = RecentlyConfirmed::new(4);
        let (root, hash) = entry(1);
        assert!(recent.put(root, hash));
        assert!(!recent.put(root, hash));
        assert!(recent.root_exists(&root));
        assert!(recent.hash_exists(&hash));
        recent.erase(&hash);
        assert!(recent.is_empty());
    }

    #[test]
    fn oldest_falls_out() {
        let recent = RecentlyConfirmed::new(2);
        for n in 1..=3 {
            let (root, hash) = entry(n);
            recent.put(root, hash);
        }
        assert_eq!(recent.len(), 2);
        assert!(!recent.hash_exists(&entry(1).1));
        assert_eq!(recent.back(), Some(entry(3)));
    }

    proptest::proptest! {
        #[test]
        fn indexes_stay_consistent(ops in proptest::collection::vec((0u8..16, proptest::bool::ANY), 0..64)) {
            let recent = RecentlyConfirmed::new(5);
            for (n, erase) in ops {
                let (root, hash) = entry(n);
                if erase {
                    recent.erase(&hash);
                } else {
                    recent.put(root, hash);
                }
                let entries = recent.entries.lock().unwrap();
                proptest::prop_assert!(entries.order.len() <= 5);
                proptest::prop_assert_eq!(entries.order.len(), entries.by_root.len());
                proptest::prop_assert_eq!(entries.order.len(), entries.by_hash.len());
            }
        }
    }
}
