//! The set of running elections.
//!
//! Elections are indexed by qualified root and by every candidate hash.
//! Votes are routed here from the vote processor; the request loop drives
//! each election's timers and hands solicitation to the confirmation
//! solicitor. Confirmation, winner changes and vote requests leave this
//! module through observers so the node can wire them to cementing, the
//! block processor and the vote generators.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_network::Network;
use lattice_types::{Amount, Block, BlockHash, QualifiedRoot, Root, Vote, VoteCode, VoteSource};
use lattice_utils::{Clock, DetailType, StatType, Stats};

use crate::config::ActiveElectionsConfig;
use crate::confirmation_solicitor::ConfirmationSolicitor;
use crate::election::{Election, ElectionBehavior, ElectionState, ElectionStatus, ElectionTimings};
use crate::error::{spawn_named, ConsensusError};
use crate::online_reps::OnlineReps;
use crate::recently_confirmed::RecentlyConfirmed;
use crate::representative_register::RepresentativeRegister;
use crate::vote_cache::VoteCache;

type ConfirmedObserver = Box<dyn Fn(&Arc<Election>, &ElectionStatus) + Send + Sync>;
type ErasedObserver = Box<dyn Fn(&Arc<Election>) + Send + Sync>;
type WinnerObserver = Box<dyn Fn(&Block) + Send + Sync>;
type VoteRequester = Box<dyn Fn(&Root, &BlockHash, bool) + Send + Sync>;
type VacancyObserver = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    confirmed: Vec<ConfirmedObserver>,
    erased: Vec<ErasedObserver>,
    winner_changed: Vec<WinnerObserver>,
    vote_requested: Vec<VoteRequester>,
    vacancy_updated: Vec<VacancyObserver>,
}

#[derive(Default)]
struct Roots {
    stopped: bool,
    by_root: HashMap<QualifiedRoot, Arc<Election>>,
    by_hash: HashMap<BlockHash, Arc<Election>>,
    /// Election id to root; iteration order is age order.
    by_age: BTreeMap<u64, QualifiedRoot>,
    counts: HashMap<ElectionBehavior, usize>,
}

impl Roots {
    fn count(&self, behavior: ElectionBehavior) -> usize {
        self.counts.get(&behavior).copied().unwrap_or(0)
    }

    fn remove(&mut self, election: &Election) -> bool {
        if self.by_root.remove(&election.qualified_root).is_none() {
            return false;
        }
        self.by_age.remove(&election.id);
        for block in election.blocks() {
            self.by_hash.remove(&block.hash());
        }
        if let Some(count) = self.counts.get_mut(&election.behavior()) {
            *count = count.saturating_sub(1);
        }
        true
    }

    fn oldest(&self, behavior: ElectionBehavior) -> Option<Arc<Election>> {
        self.by_age
            .values()
            .filter_map(|root| self.by_root.get(root))
            .find(|e| e.behavior() == behavior)
            .cloned()
    }
}

pub struct ActiveElections {
    config: ActiveElectionsConfig,
    timings: ElectionTimings,
    is_dev: bool,
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    representatives: Arc<RepresentativeRegister>,
    network: Arc<Network>,
    stats: Arc<Stats>,
    clock: Arc<dyn Clock>,
    pub recently_confirmed: RecentlyConfirmed,
    pub vote_cache: Arc<Mutex<VoteCache>>,
    /// Statuses of the latest confirmations, newest last.
    confirmation_history: Mutex<VecDeque<ElectionStatus>>,
    roots: Mutex<Roots>,
    condition: Condvar,
    observers: RwLock<Observers>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveElections {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ActiveElectionsConfig,
        ledger: Arc<Ledger>,
        online_reps: Arc<OnlineReps>,
        representatives: Arc<RepresentativeRegister>,
        network: Arc<Network>,
        vote_cache: Arc<Mutex<VoteCache>>,
        stats: Arc<Stats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timings = ElectionTimings::new(&network.constants);
        let is_dev = network.constants.is_dev();
        Self {
            recently_confirmed: RecentlyConfirmed::new(config.confirmation_cache),
            confirmation_history: Mutex::new(VecDeque::new()),
            config,
            timings,
            is_dev,
            ledger,
            online_reps,
            representatives,
            network,
            stats,
            clock,
            vote_cache,
            roots: Mutex::new(Roots::default()),
            condition: Condvar::new(),
            observers: RwLock::new(Observers::default()),
            next_id: AtomicU64::new(1),
            thread: Mutex::new(None),
        }
    }

    pub fn on_election_confirmed(&self, f: impl Fn(&Arc<Election>, &ElectionStatus) + Send + Sync + 'static) {
        self.observers.write().unwrap().confirmed.push(Box::new(f));
    }

    pub fn on_election_erased(&self, f: impl Fn(&Arc<Election>) + Send + Sync + 'static) {
        self.observers.write().unwrap().erased.push(Box::new(f));
    }

    /// Called with the new winner when votes move an election to another
    /// fork; the node forces it into the ledger.
    pub fn on_winner_changed(&self, f: impl Fn(&Block) + Send + Sync + 'static) {
        self.observers.write().unwrap().winner_changed.push(Box::new(f));
    }

    /// Called with `(root, hash, is_final)` when this node should vote.
    pub fn on_vote_requested(&self, f: impl Fn(&Root, &BlockHash, bool) + Send + Sync + 'static) {
        self.observers.write().unwrap().vote_requested.push(Box::new(f));
    }

    pub fn on_vacancy_updated(&self, f: impl Fn() + Send + Sync + 'static) {
        self.observers.write().unwrap().vacancy_updated.push(Box::new(f));
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let active = Arc::clone(self);
        let handle = spawn_named("request loop", move || active.request_loop())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.roots.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.clear();
    }

    fn request_loop(&self) {
        let interval = self.timings.base_latency * 2;
        let mut roots = self.roots.lock().unwrap();
        while !roots.stopped {
            drop(roots);
            self.tick();
            roots = self.roots.lock().unwrap();
            if !roots.stopped {
                roots = self.condition.wait_timeout(roots, interval).unwrap().0;
            }
        }
    }

    /// Start an election for `block` unless its root already has one or was
    /// confirmed recently. Returns whether a new election was created, and
    /// the election for the root if there is one.
    pub fn insert(&self, block: &Block, behavior: ElectionBehavior) -> (bool, Option<Arc<Election>>) {
        let root = block.qualified_root();
        let hash = block.hash();
        let election = {
            let mut roots = self.roots.lock().unwrap();
            if roots.stopped {
                return (false, None);
            }
            if let Some(existing) = roots.by_root.get(&root).cloned() {
                let upgrade = matches!(behavior, ElectionBehavior::Priority | ElectionBehavior::Manual)
                    && matches!(
                        existing.behavior(),
                        ElectionBehavior::Hinted | ElectionBehavior::Optimistic
                    );
                if upgrade {
                    if let Some(count) = roots.counts.get_mut(&existing.behavior()) {
                        *count = count.saturating_sub(1);
                    }
                    *roots.counts.entry(behavior).or_default() += 1;
                    existing.set_behavior(behavior);
                    self.stats.inc(StatType::ActiveElections, DetailType::Activated);
                }
                return (false, Some(existing));
            }
            if self.recently_confirmed.root_exists(&root) {
                return (false, None);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let election = Arc::new(Election::new(
                id,
                block.clone(),
                behavior,
                self.timings,
                self.clock.now(),
            ));
            roots.by_root.insert(root, Arc::clone(&election));
            roots.by_hash.insert(hash, Arc::clone(&election));
            roots.by_age.insert(id, root);
            *roots.counts.entry(behavior).or_default() += 1;
            election
        };

        self.stats.inc(StatType::ActiveElections, DetailType::ElectionStart);
        self.stats.inc(StatType::ActiveElections, behavior.detail());
        tracing::debug!(%hash, root = %root.root, ?behavior, "election started");

        self.apply_cached_votes(&hash);
        self.notify_vacancy();
        (true, Some(election))
    }

    fn apply_cached_votes(&self, hash: &BlockHash) {
        let cached = self.vote_cache.lock().unwrap().find(hash);
        if cached.is_empty() {
            return;
        }
        for vote in &cached {
            self.vote(vote, VoteSource::Cache);
        }
        self.vote_cache.lock().unwrap().erase(hash);
    }

    /// Route each hash of `vote` to its election.
    pub fn vote(&self, vote: &Arc<Vote>, source: VoteSource) -> HashMap<BlockHash, VoteCode> {
        let representative = vote.voting_account;
        let weight = self.ledger.weight(&representative);
        let mut results = HashMap::with_capacity(vote.hashes.len());
        let too_light = weight.is_zero()
            || (!self.is_dev && weight < self.online_reps.minimum_principal_weight());
        if too_light {
            for hash in &vote.hashes {
                results.insert(*hash, VoteCode::Ignored);
            }
            return results;
        }

        let now = self.clock.now();
        let cooldown = self.cooldown(weight);
        let mut touched: Vec<Arc<Election>> = Vec::new();
        let mut indeterminate = HashSet::new();
        for hash in &vote.hashes {
            let election = self.roots.lock().unwrap().by_hash.get(hash).cloned();
            let code = match election {
                Some(election) => {
                    let code = election.vote(representative, vote.timestamp, *hash, source, cooldown, now);
                    if code == VoteCode::Vote && !touched.iter().any(|e| e.id == election.id) {
                        touched.push(election);
                    }
                    code
                }
                None if self.recently_confirmed.hash_exists(hash) => VoteCode::Replay,
                None => {
                    indeterminate.insert(*hash);
                    VoteCode::Indeterminate
                }
            };
            results.insert(*hash, code);
        }

        if !indeterminate.is_empty() && source != VoteSource::Cache {
            self.vote_cache
                .lock()
                .unwrap()
                .insert(vote, weight, |h| indeterminate.contains(h), now);
            self.stats.inc(StatType::VoteCache, DetailType::Insert);
        }

        for election in touched {
            self.check_quorum(&election, now);
        }
        results
    }

    /// Minimum gap between two non-final votes of one representative.
    fn cooldown(&self, weight: Amount) -> Duration {
        let online = self.online_reps.trended().number();
        let weight = weight.number();
        if weight > online / 20 {
            Duration::from_secs(1)
        } else if weight > online / 100 {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(15)
        }
    }

    fn check_quorum(&self, election: &Arc<Election>, now: Instant) {
        let delta = self.online_reps.delta();
        let ledger = &self.ledger;
        let check = election.confirm_if_quorum(delta, &|rep| ledger.weight(rep), now);
        if let Some(block) = &check.new_winner {
            for observer in &self.observers.read().unwrap().winner_changed {
                observer(block);
            }
        }
        if let Some(hash) = &check.request_final {
            self.request_vote(&election.root, hash, true);
        }
        if let Some(status) = check.confirmed {
            self.confirmed(election, status);
        }
    }

    fn request_vote(&self, root: &Root, hash: &BlockHash, is_final: bool) {
        for observer in &self.observers.read().unwrap().vote_requested {
            observer(root, hash, is_final);
        }
    }

    fn confirmed(&self, election: &Arc<Election>, status: ElectionStatus) {
        let hash = status.winner.hash();
        self.recently_confirmed.put(election.qualified_root, hash);
        {
            let mut history = self.confirmation_history.lock().unwrap();
            history.push_back(status.clone());
            while history.len() > self.config.confirmation_history_size {
                history.pop_front();
            }
        }
        self.stats.inc(StatType::ActiveElections, DetailType::ElectionConfirmed);
        tracing::debug!(
            %hash,
            tally = status.tally.number(),
            voters = status.voter_count,
            duration_ms = status.duration.as_millis() as u64,
            "election confirmed"
        );
        for observer in &self.observers.read().unwrap().confirmed {
            observer(election, &status);
        }
        self.condition.notify_all();
    }

    /// Confirm the election's current winner without waiting for votes.
    pub fn force_confirm(&self, election: &Arc<Election>) {
        if let Some(status) = election.force_confirm(self.clock.now()) {
            self.confirmed(election, status);
        }
    }

    /// Add a fork to the election on its root. Returns true when the block
    /// was new to that election.
    pub fn publish(&self, block: &Block) -> bool {
        let root = block.qualified_root();
        let Some(election) = self.election(&root) else {
            return false;
        };
        if !election.publish(block.clone()) {
            return false;
        }
        let hash = block.hash();
        self.roots
            .lock()
            .unwrap()
            .by_hash
            .insert(hash, Arc::clone(&election));
        self.apply_cached_votes(&hash);
        self.stats.inc(StatType::Election, DetailType::Publish);
        true
    }

    /// Cementing finished for `hash`.
    ///
    /// An election whose winner it was ends as expired-confirmed; if it was
    /// still running the block was confirmed indirectly and the election is
    /// confirmed first.
    pub fn block_cemented(&self, hash: &BlockHash) {
        let Some(election) = self.election_for_hash(hash) else {
            return;
        };
        if election.winner_hash() != *hash {
            return;
        }
        if !election.is_confirmed() {
            self.force_confirm(&election);
        }
        election.set_state(ElectionState::ExpiredConfirmed, self.clock.now());
        self.erase_election(&election);
    }

    pub fn erase(&self, root: &QualifiedRoot) -> bool {
        match self.election(root) {
            Some(election) => self.erase_election(&election),
            None => false,
        }
    }

    fn erase_election(&self, election: &Arc<Election>) -> bool {
        if !self.roots.lock().unwrap().remove(election) {
            return false;
        }
        election.set_state(ElectionState::Cancelled, self.clock.now());
        let state = election.state();
        self.stats.inc(StatType::Election, state.detail());
        tracing::trace!(root = %election.qualified_root.root, ?state, "election erased");
        for observer in &self.observers.read().unwrap().erased {
            observer(election);
        }
        self.notify_vacancy();
        true
    }

    fn notify_vacancy(&self) {
        for observer in &self.observers.read().unwrap().vacancy_updated {
            observer();
        }
    }

    /// One request-loop round: advance every election's timers, solicit
    /// votes, erase finished elections and trim overfull behaviors.
    pub fn tick(&self) {
        let now = self.clock.now();
        let elections = self.list();
        let reps = self.representatives.principal_representatives(usize::MAX);
        let mut solicitor = ConfirmationSolicitor::new(
            Arc::clone(&self.network),
            Arc::clone(&self.stats),
            self.config.max_election_requests,
            self.config.max_election_broadcasts,
        );
        solicitor.prepare(&reps);
        let mut finished = Vec::new();
        for election in elections {
            let actions = election.transition_time(now);
            if actions.erase {
                finished.push(election);
                continue;
            }
            if let Some((hash, is_final)) = actions.broadcast_vote {
                self.request_vote(&election.root, &hash, is_final);
            }
            if actions.broadcast_block {
                solicitor.broadcast(&election);
            }
            if actions.request_confirm {
                solicitor.add(&election);
            }
        }
        solicitor.flush();
        for election in finished {
            self.erase_election(&election);
        }
        self.trim();
    }

    fn limit(&self, behavior: ElectionBehavior) -> usize {
        match behavior {
            ElectionBehavior::Priority => self.config.size,
            ElectionBehavior::Hinted => self.config.size * self.config.hinted_limit_percentage / 100,
            ElectionBehavior::Optimistic => {
                self.config.size * self.config.optimistic_limit_percentage / 100
            }
            ElectionBehavior::Manual => usize::MAX,
        }
    }

    /// Free slots for `behavior`; negative when overfilled.
    pub fn vacancy(&self, behavior: ElectionBehavior) -> i64 {
        let roots = self.roots.lock().unwrap();
        match behavior {
            ElectionBehavior::Manual => i64::MAX,
            ElectionBehavior::Priority => self.limit(behavior) as i64 - roots.by_root.len() as i64,
            ElectionBehavior::Hinted | ElectionBehavior::Optimistic => {
                self.limit(behavior) as i64 - roots.count(behavior) as i64
            }
        }
    }

    /// Erase the oldest elections of each behavior that is overfilled by
    /// more than a quarter of its limit.
    pub fn trim(&self) {
        for behavior in [
            ElectionBehavior::Priority,
            ElectionBehavior::Hinted,
            ElectionBehavior::Optimistic,
        ] {
            let threshold = -((self.limit(behavior) / 4) as i64);
            while self.vacancy(behavior) < threshold {
                let oldest = self.roots.lock().unwrap().oldest(behavior);
                let Some(oldest) = oldest else { break };
                self.stats.inc(StatType::ActiveElections, DetailType::Trim);
                self.erase_election(&oldest);
            }
        }
    }

    pub fn clear(&self) {
        for election in self.list() {
            self.erase_election(&election);
        }
        self.recently_confirmed.clear();
    }

    pub fn active_root(&self, root: &QualifiedRoot) -> bool {
        self.roots.lock().unwrap().by_root.contains_key(root)
    }

    pub fn active_hash(&self, hash: &BlockHash) -> bool {
        self.roots.lock().unwrap().by_hash.contains_key(hash)
    }

    pub fn election(&self, root: &QualifiedRoot) -> Option<Arc<Election>> {
        self.roots.lock().unwrap().by_root.get(root).cloned()
    }

    pub fn election_for_hash(&self, hash: &BlockHash) -> Option<Arc<Election>> {
        self.roots.lock().unwrap().by_hash.get(hash).cloned()
    }

    /// All elections, oldest first.
    pub fn list(&self) -> Vec<Arc<Election>> {
        let roots = self.roots.lock().unwrap();
        roots
            .by_age
            .values()
            .filter_map(|root| roots.by_root.get(root).cloned())
            .collect()
    }

    pub fn count(&self, behavior: ElectionBehavior) -> usize {
        self.roots.lock().unwrap().count(behavior)
    }

    pub fn len(&self) -> usize {
        self.roots.lock().unwrap().by_root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn confirmation_history(&self) -> Vec<ElectionStatus> {
        self.confirmation_history.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OnlineRepsConfig, VoteCacheConfig};
    use crate::testing::{ledger_with_reps, RepFixture};
    use lattice_nullables::{dev_network, NullClock};
    use lattice_types::Account;

    struct Harness {
        active: Arc<ActiveElections>,
        online: Arc<OnlineReps>,
        clock: Arc<NullClock>,
        fixture: RepFixture,
    }

    fn harness(weights: &[u128], config: ActiveElectionsConfig) -> Harness {
        let fixture = ledger_with_reps(weights);
        let stats = Arc::new(Stats::new());
        let online = Arc::new(OnlineReps::new(Arc::clone(&fixture.ledger), OnlineRepsConfig::dev()));
        online.set_online(Amount::raw(1000));
        let register = Arc::new(RepresentativeRegister::new(
            Arc::clone(&fixture.ledger),
            Arc::clone(&online),
            Arc::clone(&stats),
        ));
        let clock = Arc::new(NullClock::new());
        let active = Arc::new(ActiveElections::new(
            config,
            Arc::clone(&fixture.ledger),
            Arc::clone(&online),
            register,
            dev_network(Arc::clone(&stats)),
            Arc::new(Mutex::new(VoteCache::new(VoteCacheConfig::default()))),
            stats,
            clock.clone(),
        ));
        Harness {
            active,
            online,
            clock,
            fixture,
        }
    }

    fn send(fixture: &mut RepFixture, n: u8) -> Block {
        fixture.builder.genesis().send(Account::new([n; 32]), Amount::raw(1))
    }

    fn final_vote(rep: Account, hash: BlockHash) -> Arc<Vote> {
        Arc::new(Vote::new_final(rep, vec![hash]).unwrap())
    }

    #[test]
    fn insert_is_unique_per_root() {
        let mut h = harness(&[], ActiveElectionsConfig::default());
        let block = send(&mut h.fixture, 1);
        let (inserted, first) = h.active.insert(&block, ElectionBehavior::Priority);
        assert!(inserted);
        let (inserted, second) = h.active.insert(&block, ElectionBehavior::Priority);
        assert!(!inserted);
        assert_eq!(first.unwrap().id, second.unwrap().id);
        assert_eq!(h.active.len(), 1);
        assert!(h.active.active_hash(&block.hash()));
    }

    #[test]
    fn hinted_election_upgraded_by_priority_insert() {
        let mut h = harness(&[], ActiveElectionsConfig::default());
        let block = send(&mut h.fixture, 1);
        h.active.insert(&block, ElectionBehavior::Hinted);
        assert_eq!(h.active.count(ElectionBehavior::Hinted), 1);
        let (_, election) = h.active.insert(&block, ElectionBehavior::Priority);
        assert_eq!(election.unwrap().behavior(), ElectionBehavior::Priority);
        assert_eq!(h.active.count(ElectionBehavior::Hinted), 0);
        assert_eq!(h.active.count(ElectionBehavior::Priority), 1);
    }

    #[test]
    fn final_votes_at_quorum_confirm() {
        let mut h = harness(&[700, 300], ActiveElectionsConfig::default());
        let confirmed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&confirmed);
        h.active.on_election_confirmed(move |_, status| sink.lock().unwrap().push(status.winner.hash()));
        let requested = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&requested);
        h.active.on_vote_requested(move |_, hash, is_final| sink.lock().unwrap().push((*hash, is_final)));

        let block = send(&mut h.fixture, 1);
        let hash = block.hash();
        h.active.insert(&block, ElectionBehavior::Priority);

        let light = final_vote(h.fixture.reps[1].account(), hash);
        assert_eq!(h.active.vote(&light, VoteSource::Live)[&hash], VoteCode::Vote);
        assert!(confirmed.lock().unwrap().is_empty());

        let heavy = final_vote(h.fixture.reps[0].account(), hash);
        assert_eq!(h.active.vote(&heavy, VoteSource::Live)[&hash], VoteCode::Vote);
        assert_eq!(*confirmed.lock().unwrap(), vec![hash]);
        assert_eq!(*requested.lock().unwrap(), vec![(hash, true)]);
        assert!(h.active.recently_confirmed.hash_exists(&hash));

        // Late votes for a confirmed and erased election are replays.
        h.active.erase(&block.qualified_root());
        assert_eq!(h.active.vote(&heavy, VoteSource::Live)[&hash], VoteCode::Replay);
        let (inserted, election) = h.active.insert(&block, ElectionBehavior::Priority);
        assert!(!inserted);
        assert!(election.is_none());
    }

    #[test]
    fn zero_weight_votes_are_ignored() {
        let mut h = harness(&[], ActiveElectionsConfig::default());
        let block = send(&mut h.fixture, 1);
        h.active.insert(&block, ElectionBehavior::Priority);
        let vote = final_vote(Account::new([9; 32]), block.hash());
        assert_eq!(h.active.vote(&vote, VoteSource::Live)[&block.hash()], VoteCode::Ignored);
    }

    #[test]
    fn cached_votes_are_replayed_on_insert() {
        let mut h = harness(&[700], ActiveElectionsConfig::default());
        let block = send(&mut h.fixture, 1);
        let hash = block.hash();
        let vote = final_vote(h.fixture.reps[0].account(), hash);
        assert_eq!(h.active.vote(&vote, VoteSource::Live)[&hash], VoteCode::Indeterminate);
        assert_eq!(h.active.vote_cache.lock().unwrap().len(), 1);

        let (_, election) = h.active.insert(&block, ElectionBehavior::Priority);
        assert!(election.unwrap().is_confirmed());
        assert!(h.active.vote_cache.lock().unwrap().is_empty());
    }

    #[test]
    fn heavier_fork_becomes_winner() {
        let mut h = harness(&[700], ActiveElectionsConfig::default());
        let first = send(&mut h.fixture, 1);
        let changed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changed);
        h.active.on_winner_changed(move |block| sink.lock().unwrap().push(block.hash()));

        h.active.insert(&first, ElectionBehavior::Priority);
        let election = h.active.election(&first.qualified_root()).unwrap();
        let fork = match &first {
            // Same previous, different balance: a fork on the same root.
            Block::State(state) => {
                let mut other = state.clone();
                other.balance = other.balance.saturating_sub(Amount::raw(1));
                Block::State(other)
            }
            other => other.clone(),
        };
        assert!(h.active.publish(&fork));
        assert!(!h.active.publish(&fork));
        let vote = Arc::new(
            Vote::new(h.fixture.reps[0].account(), 0x100, 0, vec![fork.hash()]).unwrap(),
        );
        h.active.vote(&vote, VoteSource::Live);
        assert_eq!(election.winner_hash(), fork.hash());
        assert_eq!(*changed.lock().unwrap(), vec![fork.hash()]);
    }

    #[test]
    fn tick_expires_elections_after_ttl() {
        let mut h = harness(&[], ActiveElectionsConfig::default());
        let block = send(&mut h.fixture, 1);
        let (_, election) = h.active.insert(&block, ElectionBehavior::Priority);
        let election = election.unwrap();
        h.active.tick();
        assert_eq!(election.state(), ElectionState::Passive);
        h.clock.advance(Duration::from_millis(200));
        h.active.tick();
        assert_eq!(election.state(), ElectionState::Active);
        h.clock.advance(Duration::from_secs(61));
        h.active.tick();
        assert!(h.active.is_empty());
        assert_eq!(election.state(), ElectionState::ExpiredUnconfirmed);
    }

    #[test]
    fn block_cemented_expires_confirmed_election() {
        let mut h = harness(&[], ActiveElectionsConfig::default());
        let block = send(&mut h.fixture, 1);
        let (_, election) = h.active.insert(&block, ElectionBehavior::Priority);
        let election = election.unwrap();
        h.active.force_confirm(&election);
        h.active.block_cemented(&block.hash());
        assert_eq!(election.state(), ElectionState::ExpiredConfirmed);
        assert!(h.active.is_empty());
        assert_eq!(h.active.confirmation_history().len(), 1);
    }

    #[test]
    fn trim_erases_oldest_when_overfilled() {
        let config = ActiveElectionsConfig {
            size: 4,
            ..Default::default()
        };
        let mut h = harness(&[], config);
        let blocks: Vec<Block> = (0..6u8).map(|n| send(&mut h.fixture, n)).collect();
        for block in &blocks {
            h.active.insert(block, ElectionBehavior::Priority);
        }
        assert_eq!(h.active.vacancy(ElectionBehavior::Priority), -2);
        h.active.trim();
        // Threshold is -(4 / 4) = -1.
        assert_eq!(h.active.len(), 5);
        assert!(!h.active.active_hash(&blocks[0].hash()));
    }

    #[test]
    fn inserts_rejected_after_stop() {
        let mut h = harness(&[], ActiveElectionsConfig::default());
        h.active.start().unwrap();
        h.active.stop();
        let block = send(&mut h.fixture, 1);
        assert!(!h.active.insert(&block, ElectionBehavior::Priority).0);
        assert!(h.online.online() > Amount::ZERO);
    }
}
