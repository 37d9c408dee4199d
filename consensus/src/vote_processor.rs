//! Queue and worker for incoming votes.
//!
//! Votes are verified in batches and routed to the active elections. Queue
//! space is shared out by representative tier so a flood of votes from
//! light accounts cannot crowd out the principal representatives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use lattice_crypto::{verify_batch, SignatureCheck};
use lattice_network::Channel;
use lattice_types::{PublicKey, Vote, VoteCode, VoteSource};
use lattice_utils::{Clock, DetailType, StatType, Stats};

use crate::active_elections::ActiveElections;
use crate::config::VoteProcessorConfig;
use crate::error::{spawn_named, ConsensusError};
use crate::online_reps::OnlineReps;
use crate::rep_tiers::{RepTier, RepTiers};

type VoteObserver = Box<dyn Fn(&Arc<Vote>, Option<&Arc<dyn Channel>>, VoteCode) + Send + Sync>;

pub fn vote_code_detail(code: VoteCode) -> DetailType {
    match code {
        VoteCode::Vote => DetailType::Vote,
        VoteCode::Replay => DetailType::Replay,
        VoteCode::Indeterminate => DetailType::Indeterminate,
        VoteCode::Ignored => DetailType::Ignored,
        VoteCode::Invalid => DetailType::Invalid,
    }
}

/// Percentage of the queue a tier may fill.
fn fill_limit(tier: RepTier) -> usize {
    match tier {
        RepTier::None => 60,
        RepTier::Tier1 => 65,
        RepTier::Tier2 => 75,
        RepTier::Tier3 => 100,
    }
}

type Entry = (Arc<Vote>, Option<Arc<dyn Channel>>);

#[derive(Default)]
struct Queue {
    stopped: bool,
    processing: bool,
    votes: VecDeque<Entry>,
}

pub struct VoteProcessor {
    config: VoteProcessorConfig,
    active: Arc<ActiveElections>,
    online_reps: Arc<OnlineReps>,
    rep_tiers: Arc<RepTiers>,
    stats: Arc<Stats>,
    clock: Arc<dyn Clock>,
    queue: Mutex<Queue>,
    condition: Condvar,
    observers: RwLock<Vec<VoteObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    pub total_processed: AtomicU64,
}

impl VoteProcessor {
    pub fn new(
        config: VoteProcessorConfig,
        active: Arc<ActiveElections>,
        online_reps: Arc<OnlineReps>,
        rep_tiers: Arc<RepTiers>,
        stats: Arc<Stats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            active,
            online_reps,
            rep_tiers,
            stats,
            clock,
            queue: Mutex::new(Queue::default()),
            condition: Condvar::new(),
            observers: RwLock::new(Vec::new()),
            thread: Mutex::new(None),
            total_processed: AtomicU64::new(0),
        }
    }

    /// Called for every verified vote with its aggregate result.
    pub fn on_vote_processed(
        &self,
        f: impl Fn(&Arc<Vote>, Option<&Arc<dyn Channel>>, VoteCode) + Send + Sync + 'static,
    ) {
        self.observers.write().unwrap().push(Box::new(f));
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let processor = Arc::clone(self);
        let handle = spawn_named("vote processing", move || processor.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.queue.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Queue a vote. Returns false when the representative's tier has used
    /// up its share of the queue.
    pub fn vote(&self, vote: Arc<Vote>, channel: Option<Arc<dyn Channel>>) -> bool {
        let tier = self.rep_tiers.tier(&vote.voting_account);
        let limit = self.config.max_queue * fill_limit(tier) / 100;
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.stopped || queue.votes.len() >= limit {
                drop(queue);
                self.stats.inc(StatType::VoteProcessor, DetailType::VoteOverflow);
                self.stats.inc(StatType::VoteProcessor, tier.detail());
                return false;
            }
            queue.votes.push_back((vote, channel));
        }
        self.stats.inc(StatType::VoteProcessor, DetailType::Process);
        self.condition.notify_all();
        true
    }

    fn run(&self) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if queue.stopped {
                return;
            }
            if queue.votes.is_empty() {
                queue = self.condition.wait(queue).unwrap();
                continue;
            }
            let take = queue.votes.len().min(self.config.batch_size.max(1));
            let batch: Vec<Entry> = queue.votes.drain(..take).collect();
            queue.processing = true;
            drop(queue);

            self.process_batch(batch);

            queue = self.queue.lock().unwrap();
            queue.processing = false;
            self.condition.notify_all();
        }
    }

    /// Verify signatures for the whole batch at once, then apply each vote.
    pub fn process_batch(&self, batch: Vec<Entry>) {
        let checks: Vec<SignatureCheck> = batch
            .iter()
            .map(|(vote, _)| SignatureCheck {
                message: *vote.hash().as_bytes(),
                signature: vote.signature,
                public_key: PublicKey::from(vote.voting_account),
            })
            .collect();
        let valid = verify_batch(&checks);
        for ((vote, channel), ok) in batch.iter().zip(valid) {
            if ok {
                self.vote_blocking(vote, channel.as_ref());
            } else {
                self.stats.inc(StatType::Vote, DetailType::Invalid);
                tracing::debug!(rep = %vote.voting_account, "vote with invalid signature");
                self.notify(vote, channel.as_ref(), VoteCode::Invalid);
            }
        }
        self.total_processed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.stats.add(StatType::VoteProcessor, DetailType::Processed, batch.len() as u64);
    }

    /// Apply an already verified vote and report the combined result: replay
    /// if any hash was a replay, vote if any was counted, otherwise the code
    /// shared by the remaining hashes.
    pub fn vote_blocking(&self, vote: &Arc<Vote>, channel: Option<&Arc<dyn Channel>>) -> VoteCode {
        let results = self.active.vote(vote, VoteSource::Live);
        let code = if results.values().any(|c| *c == VoteCode::Replay) {
            VoteCode::Replay
        } else if results.values().any(|c| *c == VoteCode::Vote) {
            VoteCode::Vote
        } else if results.values().all(|c| *c == VoteCode::Ignored) && !results.is_empty() {
            VoteCode::Ignored
        } else {
            VoteCode::Indeterminate
        };
        if code != VoteCode::Ignored {
            self.online_reps.observe(vote.voting_account, self.clock.now());
        }
        self.stats.inc(StatType::Vote, vote_code_detail(code));
        tracing::trace!(rep = %vote.voting_account, hashes = vote.hashes.len(), ?code, "vote processed");
        self.notify(vote, channel, code);
        code
    }

    fn notify(&self, vote: &Arc<Vote>, channel: Option<&Arc<dyn Channel>>, code: VoteCode) {
        for observer in self.observers.read().unwrap().iter() {
            observer(vote, channel, code);
        }
    }

    /// Block until every queued vote has been processed.
    pub fn flush(&self) {
        let queue = self.queue.lock().unwrap();
        let _guard = self
            .condition
            .wait_while(queue, |q| !q.stopped && (!q.votes.is_empty() || q.processing))
            .unwrap();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::ElectionBehavior;
    use crate::testing::{consensus, ConsensusFixture};
    use lattice_crypto::sign_vote;
    use lattice_types::{Account, Amount, BlockHash, KeyPair, NetworkConstants};

    fn processor(fixture: &ConsensusFixture, config: VoteProcessorConfig) -> Arc<VoteProcessor> {
        let tiers = Arc::new(RepTiers::new(
            Arc::clone(&fixture.ledger),
            Arc::clone(&fixture.online_reps),
            &NetworkConstants::dev(),
            Arc::clone(&fixture.stats),
        ));
        Arc::new(VoteProcessor::new(
            config,
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.online_reps),
            tiers,
            Arc::clone(&fixture.stats),
            fixture.clock.clone(),
        ))
    }

    fn signed_final(key: &KeyPair, hash: BlockHash) -> Arc<Vote> {
        let mut vote = Vote::new_final(key.account(), vec![hash]).unwrap();
        sign_vote(&mut vote, &key.private);
        Arc::new(vote)
    }

    #[test]
    fn low_tier_share_overflows_first() {
        let fixture = consensus(&[]);
        let processor = processor(
            &fixture,
            VoteProcessorConfig {
                max_queue: 10,
                batch_size: 4,
            },
        );
        let vote = Arc::new(Vote::new_final(Account::new([1; 32]), vec![BlockHash::new([1; 32])]).unwrap());
        let accepted = (0..10).filter(|_| processor.vote(Arc::clone(&vote), None)).count();
        assert_eq!(accepted, 6);
        assert_eq!(
            fixture.stats.count(StatType::VoteProcessor, DetailType::VoteOverflow, lattice_utils::Direction::In),
            4
        );
    }

    #[test]
    fn invalid_signatures_are_counted() {
        let fixture = consensus(&[700]);
        let processor = processor(&fixture, VoteProcessorConfig::default());
        let vote = Arc::new(Vote::new_final(fixture.reps[0].account(), vec![BlockHash::new([1; 32])]).unwrap());
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&codes);
        processor.on_vote_processed(move |_, _, code| sink.lock().unwrap().push(code));
        processor.process_batch(vec![(vote, None)]);
        assert_eq!(*codes.lock().unwrap(), vec![VoteCode::Invalid]);
        assert_eq!(
            fixture.stats.count(StatType::Vote, DetailType::Invalid, lattice_utils::Direction::In),
            1
        );
    }

    #[test]
    fn queued_votes_confirm_through_thread() {
        let mut fixture = consensus(&[700]);
        let processor = processor(&fixture, VoteProcessorConfig::default());
        let block = fixture
            .builder
            .genesis()
            .send(Account::new([5; 32]), Amount::raw(1));
        let (_, election) = fixture.active.insert(&block, ElectionBehavior::Priority);
        processor.start().unwrap();
        assert!(processor.vote(signed_final(&fixture.reps[0], block.hash()), None));
        processor.flush();
        processor.stop();
        assert!(election.unwrap().is_confirmed());
        assert_eq!(fixture.online_reps.count(), 1);
        assert_eq!(processor.total_processed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unknown_hash_is_indeterminate() {
        let fixture = consensus(&[700]);
        let processor = processor(&fixture, VoteProcessorConfig::default());
        let code = processor.vote_blocking(&signed_final(&fixture.reps[0], BlockHash::new([3; 32])), None);
        assert_eq!(code, VoteCode::Indeterminate);
    }
}
