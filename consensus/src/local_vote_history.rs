//! Votes this node generated, kept per root so confirm_req can be answered
//! without signing again.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use lattice_types::{BlockHash, Root, Vote};

struct LocalVote {
    hash: BlockHash,
    vote: Arc<Vote>,
}

#[derive(Default)]
struct History {
    by_root: HashMap<Root, Vec<LocalVote>>,
    /// Insertion order of roots, oldest first.
    order: VecDeque<Root>,
}

pub struct LocalVoteHistory {
    max_roots: usize,
    data: Mutex<History>,
}

impl LocalVoteHistory {
    pub fn new(max_roots: usize) -> Self {
        Self {
            max_roots,
            data: Mutex::new(History::default()),
        }
    }

    /// Remember `vote` for `hash` on `root`.
    ///
    /// Votes for other hashes on the same root are discarded, as is an older
    /// vote by the same representative. A newer vote by that representative
    /// already held keeps this one out.
    pub fn add(&self, root: &Root, hash: &BlockHash, vote: Arc<Vote>) {
        let mut data = self.data.lock().unwrap();
        let entries = data.by_root.entry(*root).or_default();
        let is_new_root = entries.is_empty();
        let newer_held = entries.iter().any(|e| {
            e.hash == *hash
                && e.vote.voting_account == vote.voting_account
                && e.vote.timestamp > vote.timestamp
        });
        entries.retain(|e| {
            e.hash == *hash
                && (e.vote.voting_account != vote.voting_account
                    || e.vote.timestamp > vote.timestamp)
        });
        if !newer_held {
            entries.push(LocalVote {
                hash: *hash,
                vote,
            });
        }
        let now_empty = entries.is_empty();
        if now_empty {
            data.by_root.remove(root);
        }
        if is_new_root && !now_empty {
            data.order.push_back(*root);
        }
        while data.by_root.len() > self.max_roots {
            match data.order.pop_front() {
                Some(oldest) => {
                    data.by_root.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Votes for `hash` on `root`; only final ones when `is_final` is set.
    pub fn votes(&self, root: &Root, hash: &BlockHash, is_final: bool) -> Vec<Arc<Vote>> {
        let data = self.data.lock().unwrap();
        data.by_root
            .get(root)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.hash == *hash && (!is_final || e.vote.is_final()))
                    .map(|e| Arc::clone(&e.vote))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All votes held for `root`, whatever the hash.
    pub fn votes_for_root(&self, root: &Root) -> Vec<Arc<Vote>> {
        let data = self.data.lock().unwrap();
        data.by_root
            .get(root)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.vote)).collect())
            .unwrap_or_default()
    }

    pub fn exists(&self, root: &Root) -> bool {
        self.data.lock().unwrap().by_root.contains_key(root)
    }

    pub fn erase(&self, root: &Root) {
        let mut data = self.data.lock().unwrap();
        if data.by_root.remove(root).is_some() {
            data.order.retain(|r| r != root);
        }
    }

    pub fn len(&self) -> usize {
        self.data
            .lock()
            .unwrap()
            .by_root
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Account;

    fn vote(rep: u8, timestamp: u64, hash: BlockHash) -> Arc<Vote> {
        Arc::new(Vote::new(Account::new([rep; 32]), timestamp, 0, vec![hash]).unwrap())
    }

    fn final_vote(rep: u8, hash: BlockHash) -> Arc<Vote> {
        Arc::new(Vote::new_final(Account::new([rep; 32]), vec![hash]).unwrap())
    }

    #[test]
    fn newer_vote_replaces_older_from_same_rep() {
        let history = LocalVoteHistory::new(16);
        let root = Root::new([1; 32]);
        let hash = BlockHash::new([2; 32]);
        history.add(&root, &hash, vote(1, 0x100, hash));
        history.add(&root, &hash, vote(1, 0x200, hash));
        let votes = history.votes(&root, &hash, false);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].timestamp_ms(), 0x200);

        // An older vote does not displace the newer one.
        history.add(&root, &hash, vote(1, 0x50, hash));
        assert_eq!(history.votes(&root, &hash, false)[0].timestamp_ms(), 0x200);
    }

    #[test]
    fn vote_for_other_hash_clears_root() {
        let history = LocalVoteHistory::new(16);
        let root = Root::new([1; 32]);
        let a = BlockHash::new([2; 32]);
        let b = BlockHash::new([3; 32]);
        history.add(&root, &a, vote(1, 0x100, a));
        history.add(&root, &a, vote(2, 0x100, a));
        history.add(&root, &b, vote(1, 0x200, b));
        assert!(history.votes(&root, &a, false).is_empty());
        assert_eq!(history.votes(&root, &b, false).len(), 1);
    }

    #[test]
    fn final_filter_and_erase() {
        let history = LocalVoteHistory::new(16);
        let root = Root::new([1; 32]);
        let hash = BlockHash::new([2; 32]);
        history.add(&root, &hash, vote(1, 0x100, hash));
        history.add(&root, &hash, final_vote(2, hash));
        assert_eq!(history.votes(&root, &hash, true).len(), 1);
        assert_eq!(history.votes(&root, &hash, false).len(), 2);
        history.erase(&root);
        assert!(!history.exists(&root));
        assert!(history.is_empty());
    }

    #[test]
    fn oldest_roots_evicted_beyond_capacity() {
        let history = LocalVoteHistory::new(2);
        for n in 1..=3u8 {
            let hash = BlockHash::new([n; 32]);
            history.add(&Root::new([n; 32]), &hash, vote(1, 0x100, hash));
        }
        assert!(!history.exists(&Root::new([1; 32])));
        assert!(history.exists(&Root::new([3; 32])));
    }
}
