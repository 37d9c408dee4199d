//! A single election: competing blocks for one qualified root and the last
//! vote of every representative that voted on them.
//!
//! The election does not know representative weights or the quorum delta;
//! the container passes them in. Time is passed in as well so the state
//! machine can be driven by a test clock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use lattice_types::{Account, Amount, Block, BlockHash, NetworkConstants, QualifiedRoot, Root, Vote, VoteCode, VoteSource};
use lattice_utils::DetailType;

/// Passive elections wait this many base latencies before soliciting.
pub const PASSIVE_DURATION_FACTOR: u32 = 5;
/// Forks kept per election.
pub const MAX_BLOCKS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionBehavior {
    Priority,
    Hinted,
    Optimistic,
    Manual,
}

impl ElectionBehavior {
    pub fn detail(&self) -> DetailType {
        match self {
            ElectionBehavior::Priority => DetailType::Priority,
            ElectionBehavior::Hinted => DetailType::Hinted,
            ElectionBehavior::Optimistic => DetailType::Optimistic,
            ElectionBehavior::Manual => DetailType::Manual,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionState {
    Passive,
    Active,
    Confirmed,
    ExpiredConfirmed,
    ExpiredUnconfirmed,
    Cancelled,
}

impl ElectionState {
    pub fn detail(&self) -> DetailType {
        match self {
            ElectionState::Passive | ElectionState::Active => DetailType::ElectionStart,
            ElectionState::Confirmed => DetailType::ElectionConfirmed,
            ElectionState::ExpiredConfirmed => DetailType::ElectionExpiredConfirmed,
            ElectionState::ExpiredUnconfirmed => DetailType::ElectionExpiredUnconfirmed,
            ElectionState::Cancelled => DetailType::ElectionCancelled,
        }
    }
}

/// Timing parameters derived from the network's base latency.
#[derive(Clone, Copy, Debug)]
pub struct ElectionTimings {
    pub base_latency: Duration,
    /// Lifetime of priority and manual elections.
    pub priority_ttl: Duration,
    /// Lifetime of hinted and optimistic elections.
    pub hinted_ttl: Duration,
}

impl ElectionTimings {
    pub fn new(network: &NetworkConstants) -> Self {
        Self {
            base_latency: network.base_latency,
            priority_ttl: if network.is_dev() {
                Duration::from_secs(60)
            } else {
                Duration::from_secs(5 * 60)
            },
            hinted_ttl: Duration::from_secs(30),
        }
    }

    pub fn passive_duration(&self) -> Duration {
        self.base_latency * PASSIVE_DURATION_FACTOR
    }

    pub fn confirm_req_interval(&self) -> Duration {
        self.base_latency * 5
    }

    pub fn block_broadcast_interval(&self) -> Duration {
        self.base_latency * 15
    }

    pub fn vote_broadcast_interval(&self) -> Duration {
        self.base_latency * 10
    }

    fn ttl(&self, behavior: ElectionBehavior) -> Duration {
        match behavior {
            ElectionBehavior::Priority | ElectionBehavior::Manual => self.priority_ttl,
            ElectionBehavior::Hinted | ElectionBehavior::Optimistic => self.hinted_ttl,
        }
    }
}

/// Last vote seen from one representative.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteInfo {
    /// Local arrival time, used for the cooldown.
    pub time: Instant,
    pub timestamp: u64,
    pub hash: BlockHash,
}

impl VoteInfo {
    pub fn is_final(&self) -> bool {
        self.timestamp == Vote::FINAL_TIMESTAMP
    }
}

#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub winner: Block,
    pub tally: Amount,
    pub final_tally: Amount,
    pub duration: Duration,
    pub confirmation_request_count: u32,
    pub block_count: usize,
    pub voter_count: usize,
    pub behavior: ElectionBehavior,
}

/// What the container should do after a quorum check.
#[derive(Debug, Default)]
pub struct QuorumCheck {
    /// The leading block changed; it must be forced into the ledger.
    pub new_winner: Option<Block>,
    /// Quorum was reached for the first time; local reps should vote final.
    pub request_final: Option<BlockHash>,
    /// Set exactly once, when the election confirms.
    pub confirmed: Option<ElectionStatus>,
}

/// Work the request loop owes an election on this tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TransitionActions {
    pub erase: bool,
    /// Ask local representatives to vote for the winner.
    pub broadcast_vote: Option<(BlockHash, bool)>,
    pub broadcast_block: bool,
    pub request_confirm: bool,
}

struct ElectionData {
    state: ElectionState,
    state_start: Instant,
    behavior: ElectionBehavior,
    winner: Block,
    blocks: HashMap<BlockHash, Block>,
    last_votes: HashMap<Account, VoteInfo>,
    last_tally: HashMap<BlockHash, Amount>,
    final_weight: Amount,
    is_quorum: bool,
    confirmation_request_count: u32,
    last_req: Option<Instant>,
    last_block_broadcast: Option<Instant>,
    last_vote_broadcast: Option<Instant>,
    status: Option<ElectionStatus>,
}

pub struct Election {
    /// Insertion order; lower is older.
    pub id: u64,
    pub root: Root,
    pub qualified_root: QualifiedRoot,
    started: Instant,
    timings: ElectionTimings,
    data: Mutex<ElectionData>,
}

impl Election {
    pub fn new(
        id: u64,
        block: Block,
        behavior: ElectionBehavior,
        timings: ElectionTimings,
        now: Instant,
    ) -> Self {
        let root = block.root();
        let qualified_root = block.qualified_root();
        let state = if behavior == ElectionBehavior::Manual {
            ElectionState::Active
        } else {
            ElectionState::Passive
        };
        let mut blocks = HashMap::new();
        blocks.insert(block.hash(), block.clone());
        Self {
            id,
            root,
            qualified_root,
            started: now,
            timings,
            data: Mutex::new(ElectionData {
                state,
                state_start: now,
                behavior,
                winner: block,
                blocks,
                last_votes: HashMap::new(),
                last_tally: HashMap::new(),
                final_weight: Amount::ZERO,
                is_quorum: false,
                confirmation_request_count: 0,
                last_req: None,
                last_block_broadcast: None,
                last_vote_broadcast: None,
                status: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ElectionData> {
        self.data.lock().unwrap()
    }

    pub fn state(&self) -> ElectionState {
        self.lock().state
    }

    pub fn behavior(&self) -> ElectionBehavior {
        self.lock().behavior
    }

    pub(crate) fn set_behavior(&self, behavior: ElectionBehavior) {
        self.lock().behavior = behavior;
    }

    pub fn winner(&self) -> Block {
        self.lock().winner.clone()
    }

    pub fn winner_hash(&self) -> BlockHash {
        self.lock().winner.hash()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.lock().blocks.values().cloned().collect()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.lock().blocks.contains_key(hash)
    }

    pub fn last_votes(&self) -> HashMap<Account, VoteInfo> {
        self.lock().last_votes.clone()
    }

    pub fn voter_count(&self) -> usize {
        self.lock().last_votes.len()
    }

    /// Weight per candidate as of the last quorum check.
    pub fn last_tally(&self) -> HashMap<BlockHash, Amount> {
        self.lock().last_tally.clone()
    }

    pub fn final_weight(&self) -> Amount {
        self.lock().final_weight
    }

    pub fn is_quorum(&self) -> bool {
        self.lock().is_quorum
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.lock().state,
            ElectionState::Confirmed | ElectionState::ExpiredConfirmed
        )
    }

    pub fn status(&self) -> Option<ElectionStatus> {
        self.lock().status.clone()
    }

    pub fn confirmation_request_count(&self) -> u32 {
        self.lock().confirmation_request_count
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Move to `state` unless the election already ended.
    pub(crate) fn set_state(&self, state: ElectionState, now: Instant) {
        let mut data = self.lock();
        set_state_locked(&mut data, state, now);
    }

    /// Apply one representative's vote for `hash`.
    ///
    /// Stale and equal votes are replays. A live non-final vote arriving
    /// before `cooldown` has passed since the previous one is ignored.
    pub fn vote(
        &self,
        representative: Account,
        timestamp: u64,
        hash: BlockHash,
        source: VoteSource,
        cooldown: Duration,
        now: Instant,
    ) -> VoteCode {
        let mut data = self.lock();
        if let Some(last) = data.last_votes.get(&representative) {
            if last.timestamp > timestamp {
                return VoteCode::Replay;
            }
            if last.timestamp == timestamp && last.hash >= hash {
                return VoteCode::Replay;
            }
            let upgrades_to_final =
                timestamp == Vote::FINAL_TIMESTAMP && last.timestamp < timestamp;
            let past_cooldown = source != VoteSource::Live
                || now.saturating_duration_since(last.time) >= cooldown;
            if !upgrades_to_final && !past_cooldown {
                return VoteCode::Ignored;
            }
        }
        data.last_votes.insert(
            representative,
            VoteInfo {
                time: now,
                timestamp,
                hash,
            },
        );
        VoteCode::Vote
    }

    /// Drop the recorded votes of `representatives`, used when local votes
    /// for a replaced winner must not count any more.
    pub fn remove_votes(&self, representatives: &[Account]) {
        let mut data = self.lock();
        for rep in representatives {
            data.last_votes.remove(rep);
        }
    }

    /// Add a competing block. Returns false when it is already known, the
    /// election has ended, or the fork table is full.
    pub fn publish(&self, block: Block) -> bool {
        let mut data = self.lock();
        if matches!(
            data.state,
            ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed | ElectionState::Cancelled
        ) {
            return false;
        }
        let hash = block.hash();
        if data.blocks.contains_key(&hash) {
            // Keep the newer copy of the winner; it may carry better work.
            if data.winner.hash() == hash {
                data.winner = block.clone();
            }
            data.blocks.insert(hash, block);
            return false;
        }
        if data.blocks.len() >= MAX_BLOCKS {
            return false;
        }
        data.blocks.insert(hash, block);
        true
    }

    /// Candidates ordered by descending weight.
    pub fn tally(&self, weight: &dyn Fn(&Account) -> Amount) -> Vec<(BlockHash, Amount)> {
        let mut data = self.lock();
        tally_locked(&mut data, weight)
    }

    /// Recount, switch the winner if another block leads with enough weight,
    /// and confirm when the leader's final votes reach `delta`.
    pub fn confirm_if_quorum(
        &self,
        delta: Amount,
        weight: &dyn Fn(&Account) -> Amount,
        now: Instant,
    ) -> QuorumCheck {
        let mut data = self.lock();
        let mut check = QuorumCheck::default();
        if is_finished(data.state) {
            return check;
        }
        let tally = tally_locked(&mut data, weight);
        let Some(&(leader, leader_weight)) = tally.first() else {
            return check;
        };
        let total: Amount = tally.iter().map(|(_, w)| *w).sum();
        if total >= delta && leader != data.winner.hash() {
            if let Some(block) = data.blocks.get(&leader).cloned() {
                tracing::debug!(
                    root = %self.qualified_root.root,
                    old = %data.winner.hash(),
                    new = %leader,
                    "election winner changed"
                );
                data.winner = block.clone();
                check.new_winner = Some(block);
            }
        }
        let second = tally.get(1).map(|(_, w)| *w).unwrap_or(Amount::ZERO);
        if leader_weight.saturating_sub(second) >= delta {
            if !data.is_quorum {
                data.is_quorum = true;
                check.request_final = Some(data.winner.hash());
            }
            if data.final_weight >= delta {
                check.confirmed = Some(confirm_locked(&mut data, self.started, now));
            }
        }
        check
    }

    /// Confirm the current winner regardless of votes.
    pub fn force_confirm(&self, now: Instant) -> Option<ElectionStatus> {
        let mut data = self.lock();
        if is_finished(data.state) {
            return None;
        }
        Some(confirm_locked(&mut data, self.started, now))
    }

    /// Advance the state machine and report what needs sending.
    pub fn transition_time(&self, now: Instant) -> TransitionActions {
        let timings = self.timings;
        let mut data = self.lock();
        let mut actions = TransitionActions::default();
        match data.state {
            ElectionState::Passive => {
                if now.saturating_duration_since(data.state_start) >= timings.passive_duration() {
                    set_state_locked(&mut data, ElectionState::Active, now);
                }
            }
            ElectionState::Active => {
                if due(data.last_vote_broadcast, timings.vote_broadcast_interval(), now) {
                    data.last_vote_broadcast = Some(now);
                    actions.broadcast_vote = Some((data.winner.hash(), data.is_quorum));
                }
                if due(data.last_block_broadcast, timings.block_broadcast_interval(), now) {
                    data.last_block_broadcast = Some(now);
                    actions.broadcast_block = true;
                }
                if due(data.last_req, timings.confirm_req_interval(), now) {
                    data.last_req = Some(now);
                    data.confirmation_request_count += 1;
                    actions.request_confirm = true;
                }
            }
            ElectionState::Confirmed
            | ElectionState::ExpiredConfirmed
            | ElectionState::ExpiredUnconfirmed
            | ElectionState::Cancelled => {
                actions.erase = true;
                return actions;
            }
        }
        if now.saturating_duration_since(self.started) >= timings.ttl(data.behavior) {
            set_state_locked(&mut data, ElectionState::ExpiredUnconfirmed, now);
            return TransitionActions {
                erase: true,
                ..Default::default()
            };
        }
        actions
    }
}

impl std::fmt::Debug for Election {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.lock();
        f.debug_struct("Election")
            .field("id", &self.id)
            .field("root", &self.qualified_root.root)
            .field("state", &data.state)
            .field("behavior", &data.behavior)
            .field("winner", &data.winner.hash())
            .field("voters", &data.last_votes.len())
            .finish()
    }
}

fn is_finished(state: ElectionState) -> bool {
    !matches!(state, ElectionState::Passive | ElectionState::Active)
}

fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(at) => now.saturating_duration_since(at) >= interval,
    }
}

fn set_state_locked(data: &mut ElectionData, state: ElectionState, now: Instant) {
    use ElectionState::*;
    let allowed = match (data.state, state) {
        (Passive, Active) => true,
        (Passive | Active, Confirmed | ExpiredUnconfirmed | Cancelled) => true,
        (Confirmed, ExpiredConfirmed) => true,
        _ => false,
    };
    if allowed {
        data.state = state;
        data.state_start = now;
    }
}

fn tally_locked(
    data: &mut ElectionData,
    weight: &dyn Fn(&Account) -> Amount,
) -> Vec<(BlockHash, Amount)> {
    let mut totals: HashMap<BlockHash, Amount> = HashMap::new();
    let mut finals: HashMap<BlockHash, Amount> = HashMap::new();
    for (rep, info) in &data.last_votes {
        let rep_weight = weight(rep);
        let entry = totals.entry(info.hash).or_default();
        *entry = entry.saturating_add(rep_weight);
        if info.is_final() {
            let entry = finals.entry(info.hash).or_default();
            *entry = entry.saturating_add(rep_weight);
        }
    }
    let mut tally: Vec<(BlockHash, Amount)> = totals
        .iter()
        .filter(|(hash, _)| data.blocks.contains_key(hash))
        .map(|(hash, weight)| (*hash, *weight))
        .collect();
    tally.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    data.final_weight = tally
        .first()
        .and_then(|(hash, _)| finals.get(hash).copied())
        .unwrap_or(Amount::ZERO);
    data.last_tally = totals;
    tally
}

fn confirm_locked(data: &mut ElectionData, started: Instant, now: Instant) -> ElectionStatus {
    set_state_locked(data, ElectionState::Confirmed, now);
    let winner_hash = data.winner.hash();
    let status = ElectionStatus {
        winner: data.winner.clone(),
        tally: data.last_tally.get(&winner_hash).copied().unwrap_or(Amount::ZERO),
        final_tally: data.final_weight,
        duration: now.saturating_duration_since(started),
        confirmation_request_count: data.confirmation_request_count,
        block_count: data.blocks.len(),
        voter_count: data.last_votes.len(),
        behavior: data.behavior,
    };
    data.status = Some(status.clone());
    status
}
