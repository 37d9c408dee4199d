//! Duplicate filter for flooded messages.
//!
//! Keeps a bounded set of Blake2b-256 digests of recently seen payloads.
//! When full, the oldest digest is evicted.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use lattice_crypto::blake2b_256;

pub const DEFAULT_FILTER_SIZE: usize = 256 * 1024;

pub type Digest = [u8; 32];

pub struct NetworkFilter {
    capacity: usize,
    inner: Mutex<FilterState>,
}

#[derive(Default)]
struct FilterState {
    digests: HashSet<Digest>,
    order: VecDeque<Digest>,
}

impl NetworkFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(FilterState::default()),
        }
    }

    /// Record `payload`. Returns its digest and whether it was already seen.
    pub fn apply(&self, payload: &[u8]) -> (Digest, bool) {
        let digest = Self::hash(payload);
        let mut state = self.inner.lock().unwrap();
        if state.digests.contains(&digest) {
            return (digest, true);
        }
        if state.digests.len() >= self.capacity {
            if let Some(old) = state.order.pop_front() {
                state.digests.remove(&old);
            }
        }
        state.digests.insert(digest);
        state.order.push_back(digest);
        (digest, false)
    }

    /// Forget a digest so the same payload is accepted again.
    ///
    /// Used when a message passed the filter but could not be processed.
    pub fn clear(&self, digest: &Digest) {
        let mut state = self.inner.lock().unwrap();
        if state.digests.remove(digest) {
            state.order.retain(|d| d != digest);
        }
    }

    pub fn clear_all(&self) {
        let mut state = self.inner.lock().unwrap();
        state.digests.clear();
        state.order.clear();
    }

    pub fn hash(payload: &[u8]) -> Digest {
        blake2b_256(payload)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NetworkFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sighting_is_duplicate() {
        let filter = NetworkFilter::new(8);
        let (digest, seen) = filter.apply(b"publish");
        assert!(!seen);
        let (again, seen) = filter.apply(b"publish");
        assert!(seen);
        assert_eq!(digest, again);
        assert!(!filter.apply(b"other").1);
    }

    #[test]
    fn clear_allows_payload_again() {
        let filter = NetworkFilter::new(8);
        let (digest, _) = filter.apply(b"vote");
        filter.clear(&digest);
        assert!(!filter.apply(b"vote").1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let filter = NetworkFilter::new(2);
        filter.apply(b"a");
        filter.apply(b"b");
        filter.apply(b"c");
        assert_eq!(filter.len(), 2);
        assert!(!filter.apply(b"a").1);
        assert!(filter.apply(b"c").1);
    }
}
