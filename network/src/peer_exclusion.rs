//! Scoring and temporary exclusion of misbehaving peers.

use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::time::{Duration, Instant};

/// Score at which a peer becomes excluded.
pub const SCORE_LIMIT: u64 = 2;
const EXCLUDE_TIME: Duration = Duration::from_secs(60 * 60);
/// Entries idle for this long are forgotten, score included.
const FORGET_TIME: Duration = Duration::from_secs(24 * 60 * 60);

struct Entry {
    score: u64,
    exclude_until: Instant,
}

pub struct PeerExclusion {
    peers: HashMap<Ipv6Addr, Entry>,
    max_size: usize,
}

impl PeerExclusion {
    pub fn new(max_size: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_size,
        }
    }

    /// Penalise `endpoint`. Returns its new score.
    pub fn add(&mut self, endpoint: &SocketAddrV6) -> u64 {
        self.add_at(endpoint, Instant::now())
    }

    fn add_at(&mut self, endpoint: &SocketAddrV6, now: Instant) -> u64 {
        let ip = *endpoint.ip();
        if !self.peers.contains_key(&ip) && self.peers.len() >= self.max_size {
            self.evict_oldest();
        }
        let entry = self.peers.entry(ip).or_insert(Entry {
            score: 0,
            exclude_until: now,
        });
        entry.score += 1;
        if entry.score >= SCORE_LIMIT {
            entry.exclude_until = now + exclusion_duration(entry.score);
            tracing::debug!(peer = %ip, score = entry.score, "peer excluded");
        }
        entry.score
    }

    pub fn is_excluded(&self, endpoint: &SocketAddrV6) -> bool {
        self.is_excluded_at(endpoint, Instant::now())
    }

    fn is_excluded_at(&self, endpoint: &SocketAddrV6, now: Instant) -> bool {
        self.peers
            .get(endpoint.ip())
            .map(|entry| entry.score >= SCORE_LIMIT && now < entry.exclude_until)
            .unwrap_or(false)
    }

    pub fn score(&self, endpoint: &SocketAddrV6) -> u64 {
        self.peers.get(endpoint.ip()).map(|e| e.score).unwrap_or(0)
    }

    pub fn remove(&mut self, endpoint: &SocketAddrV6) {
        self.peers.remove(endpoint.ip());
    }

    /// Forget peers whose exclusion lapsed long ago.
    pub fn purge(&mut self) {
        self.purge_at(Instant::now());
    }

    fn purge_at(&mut self, now: Instant) {
        self.peers
            .retain(|_, entry| now.saturating_duration_since(entry.exclude_until) < FORGET_TIME);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .peers
            .iter()
            .min_by_key(|(_, entry)| entry.exclude_until)
            .map(|(ip, _)| *ip);
        if let Some(ip) = oldest {
            self.peers.remove(&ip);
        }
    }
}

/// Doubles with every further offence past the limit.
fn exclusion_duration(score: u64) -> Duration {
    let exponent = (score / SCORE_LIMIT).saturating_sub(1).min(16) as u32;
    EXCLUDE_TIME * 2u32.pow(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u16) -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, n), 7075, 0, 0)
    }

    #[test]
    fn excluded_once_score_reaches_limit() {
        let mut exclusion = PeerExclusion::new(10);
        let now = Instant::now();
        assert_eq!(exclusion.add_at(&peer(1), now), 1);
        assert!(!exclusion.is_excluded_at(&peer(1), now));
        assert_eq!(exclusion.add_at(&peer(1), now), 2);
        assert!(exclusion.is_excluded_at(&peer(1), now));
        assert!(!exclusion.is_excluded_at(&peer(1), now + EXCLUDE_TIME));
        // Exclusion is per IP, whatever the port.
        let other_port = SocketAddrV6::new(*peer(1).ip(), 1, 0, 0);
        assert!(exclusion.is_excluded_at(&other_port, now));
    }

    #[test]
    fn duration_grows_exponentially() {
        assert_eq!(exclusion_duration(2), EXCLUDE_TIME);
        assert_eq!(exclusion_duration(4), EXCLUDE_TIME * 2);
        assert_eq!(exclusion_duration(8), EXCLUDE_TIME * 8);
    }

    #[test]
    fn bounded_size_evicts_oldest() {
        let mut exclusion = PeerExclusion::new(2);
        let now = Instant::now();
        exclusion.add_at(&peer(1), now);
        exclusion.add_at(&peer(2), now + Duration::from_secs(1));
        exclusion.add_at(&peer(3), now + Duration::from_secs(2));
        assert_eq!(exclusion.len(), 2);
        assert_eq!(exclusion.score(&peer(1)), 0);
        assert_eq!(exclusion.score(&peer(3)), 1);
    }

    #[test]
    fn purge_forgets_stale_entries() {
        let mut exclusion = PeerExclusion::new(10);
        let now = Instant::now();
        exclusion.add_at(&peer(1), now);
        exclusion.purge_at(now + FORGET_TIME + Duration::from_secs(1));
        assert!(exclusion.is_empty());
    }
}
