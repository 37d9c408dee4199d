//! Bundles confirmation requests for active elections into confirm_req
//! messages, one batch per representative channel.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_messages::{ConfirmReq, Message, Publish};
use lattice_network::{Channel, ChannelId, DropPolicy, Network, TrafficType};
use lattice_types::{BlockHash, Root};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use crate::election::Election;
use crate::representative_register::PeeredRep;

pub struct ConfirmationSolicitor {
    network: Arc<Network>,
    stats: Arc<Stats>,
    /// Block broadcasts allowed per round across all elections.
    max_block_broadcasts: usize,
    /// Requests per election, not counting reps that voted for another hash.
    max_election_requests: usize,
    /// Directed broadcasts per election.
    max_election_broadcasts: usize,
    representative_requests: Vec<PeeredRep>,
    representative_broadcasts: Vec<PeeredRep>,
    requests: HashMap<ChannelId, (Arc<dyn Channel>, Vec<(BlockHash, Root)>)>,
    rebroadcasted: usize,
    prepared: bool,
}

impl ConfirmationSolicitor {
    pub fn new(
        network: Arc<Network>,
        stats: Arc<Stats>,
        max_election_requests: usize,
        max_election_broadcasts: usize,
    ) -> Self {
        let max_block_broadcasts = if network.constants.is_dev() { 4 } else { 30 };
        let max_election_broadcasts = max_election_broadcasts.min((network.fanout(1.0) / 2).max(1));
        Self {
            network,
            stats,
            max_block_broadcasts,
            max_election_requests,
            max_election_broadcasts,
            representative_requests: Vec::new(),
            representative_broadcasts: Vec::new(),
            requests: HashMap::new(),
            rebroadcasted: 0,
            prepared: false,
        }
    }

    /// Start a round targeting `representatives`.
    pub fn prepare(&mut self, representatives: &[PeeredRep]) {
        self.requests.clear();
        self.rebroadcasted = 0;
        self.representative_requests = representatives.to_vec();
        self.representative_broadcasts = representatives.to_vec();
        self.prepared = true;
    }

    /// Publish the winner to representatives that have not voted for it,
    /// then flood it. Returns false once this round's broadcast budget is
    /// spent.
    pub fn broadcast(&mut self, election: &Election) -> bool {
        debug_assert!(self.prepared);
        self.rebroadcasted += 1;
        if self.rebroadcasted >= self.max_block_broadcasts {
            return false;
        }
        let winner = election.winner();
        let hash = winner.hash();
        let last_votes = election.last_votes();
        let message = Message::Publish(Publish::new(winner));
        let mut count = 0;
        for rep in &self.representative_broadcasts {
            if count >= self.max_election_broadcasts {
                break;
            }
            let send = match last_votes.get(&rep.account) {
                Some(existing) => existing.hash != hash,
                None => {
                    count += 1;
                    true
                }
            };
            if send {
                rep.channel.send(&message, DropPolicy::CanDrop, TrafficType::Generic);
            }
        }
        self.network.flood(&message, DropPolicy::CanDrop, 0.5);
        self.stats
            .inc_dir(StatType::ConfirmationSolicitor, DetailType::BroadcastBlock, Direction::Out);
        true
    }

    /// Queue the winner for every representative lacking a usable vote.
    /// Returns false when nothing could be queued.
    pub fn add(&mut self, election: &Election) -> bool {
        debug_assert!(self.prepared);
        let winner = election.winner();
        let hash = winner.hash();
        let pair = (hash, winner.root());
        let is_quorum = election.is_quorum();
        let last_votes = election.last_votes();
        let mut queued = false;
        let mut count = 0;
        let mut full = Vec::new();
        for rep in &self.representative_requests {
            if count >= self.max_election_requests {
                break;
            }
            // Before quorum any vote for the winner will do; after it only a
            // final one.
            let (needs_request, different) = match last_votes.get(&rep.account) {
                None => (true, false),
                Some(existing) => {
                    let different = existing.hash != hash;
                    (different || (is_quorum && !existing.is_final()), different)
                }
            };
            if !needs_request {
                continue;
            }
            if rep.channel.max(TrafficType::Generic) {
                full.push(rep.account);
                continue;
            }
            self.requests
                .entry(rep.channel_id())
                .or_insert_with(|| (Arc::clone(&rep.channel), Vec::new()))
                .1
                .push(pair);
            if !different {
                count += 1;
            }
            queued = true;
        }
        if !full.is_empty() {
            self.representative_requests.retain(|r| !full.contains(&r.account));
        }
        queued
    }

    /// Send the queued requests, at most seven pairs per message.
    pub fn flush(&mut self) {
        debug_assert!(self.prepared);
        for (channel, pairs) in self.requests.values() {
            for chunk in pairs.chunks(ConfirmReq::MAX_PAIRS) {
                if let Some(req) = ConfirmReq::new(chunk.to_vec()) {
                    channel.send(&Message::ConfirmReq(req), DropPolicy::CanDrop, TrafficType::Generic);
                    self.stats.inc_dir(
                        StatType::ConfirmationSolicitor,
                        DetailType::ConfirmReqSent,
                        Direction::Out,
                    );
                }
            }
        }
        self.requests.clear();
        self.prepared = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::{ElectionBehavior, ElectionTimings};
    use lattice_nullables::{dev_network, NullChannel};
    use lattice_types::{Account, Block, NetworkConstants, OpenBlock, Signature, VoteSource};
    use std::time::{Duration, Instant};

    fn open(n: u8) -> Block {
        Block::Open(OpenBlock {
            source: BlockHash::new([n; 32]),
            representative: Account::new([1; 32]),
            account: Account::new([2; 32]),
            signature: Signature::default(),
            work: 0,
        })
    }

    fn solicitor() -> ConfirmationSolicitor {
        let stats = Arc::new(Stats::new());
        let network = dev_network(Arc::clone(&stats));
        ConfirmationSolicitor::new(network, stats, 50, 50)
    }

    fn rep(n: u8, channel: Arc<NullChannel>) -> PeeredRep {
        PeeredRep {
            account: Account::new([n; 32]),
            channel,
            last_request: None,
            last_response: Instant::now(),
        }
    }

    fn election(block: Block) -> Election {
        let timings = ElectionTimings::new(&NetworkConstants::dev());
        Election::new(1, block, ElectionBehavior::Priority, timings, Instant::now())
    }

    #[test]
    fn batches_requests_per_channel() {
        let mut solicitor = solicitor();
        let channel = NullChannel::new(1);
        solicitor.prepare(&[rep(10, channel.clone())]);
        for n in 0..9 {
            assert!(solicitor.add(&election(open(n))));
        }
        solicitor.flush();
        let sent = channel.take_sent();
        assert_eq!(sent.len(), 2);
        match &sent[0] {
            Message::ConfirmReq(req) => assert_eq!(req.roots_hashes.len(), ConfirmReq::MAX_PAIRS),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skips_reps_that_already_voted_for_winner() {
        let mut solicitor = solicitor();
        let channel = NullChannel::new(1);
        let e = election(open(1));
        let now = Instant::now();
        e.vote(Account::new([10; 32]), 0x10, e.winner_hash(), VoteSource::Live, Duration::ZERO, now);
        e.vote(
            Account::new([11; 32]),
            0x10,
            BlockHash::new([99; 32]),
            VoteSource::Live,
            Duration::ZERO,
            now,
        );
        solicitor.prepare(&[rep(10, channel.clone()), rep(11, channel.clone())]);
        assert!(solicitor.add(&e));
        solicitor.flush();
        let sent = channel.take_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            // Only the rep that voted for another block is asked.
            Message::ConfirmReq(req) => assert_eq!(req.roots_hashes.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn full_channels_are_dropped_from_the_round() {
        let mut solicitor = solicitor();
        let channel = NullChannel::new(1);
        channel.set_full(true);
        solicitor.prepare(&[rep(10, channel.clone())]);
        assert!(!solicitor.add(&election(open(1))));
        solicitor.flush();
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn broadcast_publishes_winner_until_budget_spent() {
        let mut solicitor = solicitor();
        let channel = NullChannel::new(1);
        solicitor.prepare(&[rep(10, channel.clone())]);
        let e = election(open(1));
        let mut accepted = 0;
        while solicitor.broadcast(&e) {
            accepted += 1;
        }
        assert_eq!(accepted, 3);
        assert!(matches!(channel.sent()[0], Message::Publish(_)));
        solicitor.flush();
    }
}
