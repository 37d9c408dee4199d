//! Discovers which peers are representatives.
//!
//! A confirm_req for a random block goes out to a sample of channels; a
//! vote for that hash coming back on the same channel names the
//! representative behind it. Known representatives are re-queried so dead
//! channels age out of the register.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_messages::{ConfirmReq, Message};
use lattice_network::{Channel, ChannelId, DropPolicy, Network, TrafficType};
use lattice_types::{BlockHash, Root, Vote};
use lattice_utils::{Clock, DetailType, Direction, StatType, Stats};

use crate::active_elections::ActiveElections;
use crate::config::RepCrawlerConfig;
use crate::error::{spawn_named, ConsensusError};
use crate::online_reps::OnlineReps;
use crate::representative_register::{RegisterResult, RepresentativeRegister};

const MAX_RESPONSES: usize = 4096;

struct Query {
    hash: BlockHash,
    channel: Arc<dyn Channel>,
    sent: Instant,
    replies: usize,
}

#[derive(Default)]
struct CrawlerData {
    stopped: bool,
    queries: HashMap<ChannelId, Query>,
    responses: VecDeque<(Arc<dyn Channel>, Arc<Vote>)>,
    last_crawl: Option<Instant>,
    crawl_now: bool,
}

pub struct RepCrawler {
    config: RepCrawlerConfig,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    register: Arc<RepresentativeRegister>,
    online_reps: Arc<OnlineReps>,
    network: Arc<Network>,
    stats: Arc<Stats>,
    clock: Arc<dyn Clock>,
    data: Mutex<CrawlerData>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RepCrawler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RepCrawlerConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        register: Arc<RepresentativeRegister>,
        online_reps: Arc<OnlineReps>,
        network: Arc<Network>,
        stats: Arc<Stats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            active,
            register,
            online_reps,
            network,
            stats,
            clock,
            data: Mutex::new(CrawlerData::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let crawler = Arc::clone(self);
        let handle = spawn_named("rep crawler", move || crawler.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.data.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Ask for a crawl on the next wakeup, e.g. after new peers connect.
    pub fn crawl_soon(&self) {
        self.data.lock().unwrap().crawl_now = true;
        self.condition.notify_all();
    }

    /// Whether enough weight is reachable to reach quorum.
    fn sufficient_weight(&self) -> bool {
        self.register.total_weight() > self.online_reps.delta()
    }

    fn query_interval(&self, sufficient: bool) -> Duration {
        if self.network.constants.is_dev() {
            if sufficient {
                Duration::from_millis(500)
            } else {
                Duration::from_millis(100)
            }
        } else if sufficient {
            Duration::from_secs(7)
        } else {
            Duration::from_secs(3)
        }
    }

    fn run(&self) {
        let mut data = self.data.lock().unwrap();
        loop {
            if data.stopped {
                return;
            }
            let interval = self.query_interval(self.sufficient_weight());
            data = self
                .condition
                .wait_timeout_while(data, interval, |d| {
                    !d.stopped && d.responses.is_empty() && !d.crawl_now
                })
                .unwrap()
                .0;
            if data.stopped {
                return;
            }
            let responses: Vec<_> = data.responses.drain(..).collect();
            let now = self.clock.now();
            let crawl_due = data.crawl_now
                || data
                    .last_crawl
                    .map_or(true, |last| now.saturating_duration_since(last) >= interval);
            drop(data);

            self.validate_and_process(responses, now);
            self.cleanup(now);
            if crawl_due {
                let targets = self.prepare_crawl_targets(now);
                self.query(&targets);
            }

            data = self.data.lock().unwrap();
            if crawl_due {
                data.last_crawl = Some(now);
                data.crawl_now = false;
            }
        }
    }

    fn validate_and_process(&self, responses: Vec<(Arc<dyn Channel>, Arc<Vote>)>, now: Instant) {
        for (channel, vote) in responses {
            let rep = vote.voting_account;
            if self.ledger.weight(&rep).is_zero() {
                tracing::debug!(%rep, channel = %channel.channel_id(), "reply from zero weight account");
                continue;
            }
            match self.register.update_or_insert(rep, Arc::clone(&channel), now) {
                RegisterResult::Inserted => {
                    tracing::info!(
                        %rep,
                        endpoint = %channel.remote_endpoint(),
                        "found representative"
                    );
                }
                RegisterResult::ChannelChanged(previous) => {
                    tracing::info!(
                        %rep,
                        from = %previous.remote_endpoint(),
                        to = %channel.remote_endpoint(),
                        "representative changed channel"
                    );
                }
                RegisterResult::Updated => {}
            }
        }
    }

    fn cleanup(&self, now: Instant) {
        self.register.cleanup();
        let timeout = self.config.query_timeout();
        let mut data = self.data.lock().unwrap();
        let before = data.queries.len();
        data.queries.retain(|_, query| {
            let alive = query.channel.is_alive();
            let timed_out = now.saturating_duration_since(query.sent) >= timeout;
            if timed_out && query.replies == 0 {
                tracing::trace!(channel = %query.channel.channel_id(), "rep query timed out");
            }
            alive && !timed_out
        });
        let removed = before - data.queries.len();
        drop(data);
        self.stats.add(StatType::RepCrawler, DetailType::QueryTimeout, removed as u64);
    }

    /// Channels not currently being queried. With enough weight found, known
    /// representatives are left alone until their last request is stale.
    fn prepare_crawl_targets(&self, now: Instant) -> Vec<Arc<dyn Channel>> {
        let sufficient = self.sufficient_weight();
        let count = if sufficient {
            self.config.crawl_fanout / 2
        } else {
            self.config.crawl_fanout
        }
        .max(1);
        let data = self.data.lock().unwrap();
        let requery = self.query_interval(sufficient) * 4;
        self.network
            .random_channels(count * 2)
            .into_iter()
            .filter(|c| !data.queries.contains_key(&c.channel_id()))
            .filter(|c| {
                self.register
                    .last_request_elapsed(c.channel_id(), now)
                    .map_or(true, |elapsed| elapsed >= requery)
            })
            .take(count)
            .collect()
    }

    /// A random ledger block that is not a recent confirmation, falling
    /// back to genesis.
    fn prepare_query_target(&self) -> (BlockHash, Root) {
        let txn = self.ledger.store.tx_begin_read();
        for _ in 0..4 {
            if let Some(saved) = self.ledger.random_block(&txn) {
                let hash = saved.block.hash();
                if !self.active.recently_confirmed.hash_exists(&hash) {
                    return (hash, saved.block.root());
                }
            }
        }
        let genesis = self.ledger.constants.genesis_hash();
        let root = self
            .ledger
            .block(&txn, &genesis)
            .map(|saved| saved.block.root())
            .unwrap_or_else(|| Root::from(genesis));
        (genesis, root)
    }

    /// Send a crawl query to each channel and remember what was asked.
    pub fn query(&self, channels: &[Arc<dyn Channel>]) {
        if channels.is_empty() {
            return;
        }
        let (hash, root) = self.prepare_query_target();
        let Some(request) = ConfirmReq::new(vec![(hash, root)]) else {
            return;
        };
        let message = Message::ConfirmReq(request);
        let now = self.clock.now();
        for channel in channels {
            let id = channel.channel_id();
            self.data.lock().unwrap().queries.insert(
                id,
                Query {
                    hash,
                    channel: Arc::clone(channel),
                    sent: now,
                    replies: 0,
                },
            );
            self.register.on_rep_request(id, now);
            channel.send(&message, DropPolicy::ShouldNotDrop, TrafficType::Generic);
            self.stats
                .inc_dir(StatType::RepCrawler, DetailType::CrawlQuery, Direction::Out);
        }
        tracing::trace!(%hash, channels = channels.len(), "rep crawl");
    }

    pub fn is_querying(&self, channel: ChannelId) -> bool {
        self.data.lock().unwrap().queries.contains_key(&channel)
    }

    /// Offer a vote received on `channel`. Returns true when it answers an
    /// outstanding query and was queued.
    pub fn process(&self, vote: &Arc<Vote>, channel: &Arc<dyn Channel>) -> bool {
        let mut data = self.data.lock().unwrap();
        let Some(query) = data.queries.get_mut(&channel.channel_id()) else {
            return false;
        };
        if !vote.hashes.contains(&query.hash) {
            drop(data);
            self.stats.inc(StatType::RepCrawler, DetailType::ResponseUnsolicited);
            return false;
        }
        query.replies += 1;
        if data.responses.len() >= MAX_RESPONSES {
            drop(data);
            self.stats.inc(StatType::RepCrawler, DetailType::Overfill);
            return false;
        }
        data.responses.push_back((Arc::clone(channel), Arc::clone(vote)));
        drop(data);
        self.stats.inc(StatType::RepCrawler, DetailType::RepResponse);
        self.condition.notify_all();
        true
    }

    pub fn pending_queries(&self) -> usize {
        self.data.lock().unwrap().queries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{consensus, ConsensusFixture};
    use lattice_nullables::NullChannel;

    fn crawler(fixture: &ConsensusFixture, timeout_ms: u64) -> Arc<RepCrawler> {
        Arc::new(RepCrawler::new(
            RepCrawlerConfig {
                query_timeout_ms: timeout_ms,
                crawl_fanout: 4,
            },
            Arc::clone(&fixture.ledger),
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.register),
            Arc::clone(&fixture.online_reps),
            Arc::clone(&fixture.network),
            Arc::clone(&fixture.stats),
            fixture.clock.clone(),
        ))
    }

    fn queried_hash(channel: &NullChannel) -> BlockHash {
        match &channel.sent()[0] {
            Message::ConfirmReq(req) => req.roots_hashes[0].0,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn matching_vote_identifies_representative() {
        let fixture = consensus(&[700]);
        let crawler = crawler(&fixture, 60_000);
        let null = NullChannel::new(3);
        let channel: Arc<dyn Channel> = null.clone();
        crawler.query(&[Arc::clone(&channel)]);
        assert!(crawler.is_querying(ChannelId(3)));
        let hash = queried_hash(&null);

        let vote = Arc::new(Vote::new_final(fixture.reps[0].account(), vec![hash]).unwrap());
        assert!(crawler.process(&vote, &channel));
        let responses: Vec<_> = crawler.data.lock().unwrap().responses.drain(..).collect();
        crawler.validate_and_process(responses, fixture.clock.now());
        assert_eq!(fixture.register.len(), 1);
        assert!(fixture.register.is_pr(ChannelId(3)));
    }

    #[test]
    fn unrelated_votes_are_ignored() {
        let fixture = consensus(&[700]);
        let crawler = crawler(&fixture, 60_000);
        let null = NullChannel::new(3);
        let channel: Arc<dyn Channel> = null.clone();
        let vote = Arc::new(
            Vote::new_final(fixture.reps[0].account(), vec![BlockHash::new([7; 32])]).unwrap(),
        );
        // Not queried yet.
        assert!(!crawler.process(&vote, &channel));
        crawler.query(&[Arc::clone(&channel)]);
        if queried_hash(&null) != BlockHash::new([7; 32]) {
            assert!(!crawler.process(&vote, &channel));
            assert_eq!(
                fixture
                    .stats
                    .count(StatType::RepCrawler, DetailType::ResponseUnsolicited, Direction::In),
                1
            );
        }
    }

    #[test]
    fn queries_time_out() {
        let fixture = consensus(&[700]);
        let crawler = crawler(&fixture, 1_000);
        let channel: Arc<dyn Channel> = NullChannel::new(3);
        crawler.query(&[channel]);
        crawler.cleanup(fixture.clock.now());
        assert_eq!(crawler.pending_queries(), 1);
        fixture.clock.advance(Duration::from_secs(2));
        crawler.cleanup(fixture.clock.now());
        assert_eq!(crawler.pending_queries(), 0);
    }

    #[test]
    fn zero_weight_replies_do_not_register() {
        let fixture = consensus(&[700]);
        let crawler = crawler(&fixture, 60_000);
        let channel: Arc<dyn Channel> = NullChannel::new(3);
        let vote = Arc::new(
            Vote::new_final(lattice_types::Account::new([42; 32]), vec![BlockHash::new([1; 32])])
                .unwrap(),
        );
        crawler.validate_and_process(vec![(channel, vote)], fixture.clock.now());
        assert!(fixture.register.is_empty());
    }
}
