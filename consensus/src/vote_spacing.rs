//! Vote spacing: a node must not flip its vote on a root faster than the
//! configured delay. Re-voting for the same hash is always allowed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lattice_types::{BlockHash, Root};

pub struct VoteSpacing {
    delay: Duration,
    recent: HashMap<Root, (Instant, BlockHash)>,
}

impl VoteSpacing {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            recent: HashMap::new(),
        }
    }

    pub fn votable(&self, root: &Root, hash: &BlockHash, now: Instant) -> bool {
        match self.recent.get(root) {
            None => true,
            Some((time, last)) => last == hash || now.saturating_duration_since(*time) >= self.delay,
        }
    }

    /// Record a vote on `root`. A vote for a different hash replaces the
    /// entry; a repeat vote only refreshes its time.
    pub fn flag(&mut self, root: &Root, hash: &BlockHash, now: Instant) {
        self.trim(now);
        self.recent.insert(*root, (now, *hash));
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    fn trim(&mut self, now: Instant) {
        let delay = self.delay;
        self.recent
            .retain(|_, (time, _)| now.saturating_duration_since(*time) < delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(n: u8) -> Root {
        Root::new([n; 32])
    }

    fn hash(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    #[test]
    fn unknown_root_is_votable() {
        let spacing = VoteSpacing::new(Duration::from_secs(1));
        assert!(spacing.votable(&root(1), &hash(1), Instant::now()));
    }

    #[test]
    fn flipping_waits_for_delay() {
        let now = Instant::now();
        let mut spacing = VoteSpacing::new(Duration::from_secs(1));
        spacing.flag(&root(1), &hash(1), now);
        assert!(spacing.votable(&root(1), &hash(1), now));
        assert!(!spacing.votable(&root(1), &hash(2), now));
        assert!(spacing.votable(&root(1), &hash(2), now + Duration::from_secs(1)));
        assert!(spacing.votable(&root(2), &hash(2), now));
    }

    #[test]
    fn stale_entries_are_pruned_on_flag() {
        let now = Instant::now();
        let mut spacing = VoteSpacing::new(Duration::from_millis(10));
        spacing.flag(&root(1), &hash(1), now);
        spacing.flag(&root(2), &hash(2), now);
        assert_eq!(spacing.len(), 2);
        spacing.flag(&root(3), &hash(3), now + Duration::from_millis(20));
        assert_eq!(spacing.len(), 1);
    }
}
