//! Which accounts ascending bootstrap should ask about next.
//!
//! Accounts live in one of two sets. Prioritized accounts carry a score
//! that grows while pulls keep returning blocks and shrinks when they come
//! back empty. Blocked accounts wait for one missing dependency (a source
//! block from another chain) and are not requested until it arrives.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::Rng;

use lattice_types::{Account, BlockHash};

#[derive(Clone, Debug, PartialEq)]
pub struct AccountSetsConfig {
    /// Random candidates compared by [`AccountSets::next`].
    pub consideration_count: usize,
    pub priorities_max: usize,
    pub blocking_max: usize,
    /// Minimum time between two requests for one account.
    pub cooldown: Duration,
}

impl Default for AccountSetsConfig {
    fn default() -> Self {
        Self {
            consideration_count: 4,
            priorities_max: 256 * 1024,
            blocking_max: 256 * 1024,
            cooldown: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PriorityEntry {
    priority: f64,
    timestamp: Option<Instant>,
    sequence: u64,
    /// Position in `AccountSets::sample`.
    slot: usize,
}

#[derive(Clone, Copy, Debug)]
struct BlockingEntry {
    dependency: BlockHash,
    /// Priority the account had when it got blocked.
    original: Option<f64>,
    sequence: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityUp {
    Inserted,
    Updated,
    Blocked,
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityDown {
    Deprioritized,
    Erased,
    NotFound,
}

pub struct AccountSets {
    config: AccountSetsConfig,
    sequence: u64,
    priorities: HashMap<Account, PriorityEntry>,
    /// Dense copy of the prioritized accounts for uniform sampling.
    sample: Vec<Account>,
    priority_order: BTreeMap<u64, Account>,
    blocking: HashMap<Account, BlockingEntry>,
    blocking_order: BTreeMap<u64, Account>,
    dependents: HashMap<BlockHash, HashSet<Account>>,
}

impl AccountSets {
    pub const PRIORITY_INITIAL: f64 = 2.0;
    pub const PRIORITY_INCREASE: f64 = 2.0;
    pub const PRIORITY_DIVIDE: f64 = 2.0;
    pub const PRIORITY_MAX: f64 = 128.0;
    pub const PRIORITY_CUTOFF: f64 = 0.15;

    pub fn new(config: AccountSetsConfig) -> Self {
        Self {
            config,
            sequence: 0,
            priorities: HashMap::new(),
            sample: Vec::new(),
            priority_order: BTreeMap::new(),
            blocking: HashMap::new(),
            blocking_order: BTreeMap::new(),
            dependents: HashMap::new(),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn insert_priority(&mut self, account: Account, priority: f64) {
        let sequence = self.next_sequence();
        let slot = self.sample.len();
        self.sample.push(account);
        self.priority_order.insert(sequence, account);
        self.priorities.insert(
            account,
            PriorityEntry {
                priority,
                timestamp: None,
                sequence,
                slot,
            },
        );
    }

    fn remove_priority(&mut self, account: &Account) -> Option<PriorityEntry> {
        let entry = self.priorities.remove(account)?;
        self.priority_order.remove(&entry.sequence);
        self.sample.swap_remove(entry.slot);
        if let Some(moved) = self.sample.get(entry.slot).copied() {
            if let Some(moved_entry) = self.priorities.get_mut(&moved) {
                moved_entry.slot = entry.slot;
            }
        }
        Some(entry)
    }

    fn remove_blocking(&mut self, account: &Account) -> Option<BlockingEntry> {
        let entry = self.blocking.remove(account)?;
        self.blocking_order.remove(&entry.sequence);
        if let Some(accounts) = self.dependents.get_mut(&entry.dependency) {
            accounts.remove(account);
            if accounts.is_empty() {
                self.dependents.remove(&entry.dependency);
            }
        }
        Some(entry)
    }

    /// Raise the priority of an unblocked account, inserting it if unknown.
    pub fn priority_up(&mut self, account: &Account) -> PriorityUp {
        if account.is_zero() {
            return PriorityUp::Invalid;
        }
        if self.blocked(account) {
            return PriorityUp::Blocked;
        }
        if let Some(entry) = self.priorities.get_mut(account) {
            entry.priority = (entry.priority + Self::PRIORITY_INCREASE).min(Self::PRIORITY_MAX);
            return PriorityUp::Updated;
        }
        self.insert_priority(*account, Self::PRIORITY_INITIAL);
        self.trim_overflow();
        PriorityUp::Inserted
    }

    /// Halve the priority of an account, dropping it below the cutoff.
    pub fn priority_down(&mut self, account: &Account) -> PriorityDown {
        let Some(entry) = self.priorities.get_mut(account) else {
            return PriorityDown::NotFound;
        };
        let lowered = entry.priority / Self::PRIORITY_DIVIDE;
        if lowered <= Self::PRIORITY_CUTOFF {
            self.remove_priority(account);
            PriorityDown::Erased
        } else {
            entry.priority = lowered;
            PriorityDown::Deprioritized
        }
    }

    /// Insert with the initial priority unless already known.
    pub fn priority_set(&mut self, account: &Account) -> bool {
        if account.is_zero() || self.blocked(account) || self.prioritized(account) {
            return false;
        }
        self.insert_priority(*account, Self::PRIORITY_INITIAL);
        self.trim_overflow();
        true
    }

    /// Park `account` until `dependency` is processed.
    pub fn block(&mut self, account: Account, dependency: BlockHash) {
        if account.is_zero() {
            return;
        }
        let original = self.remove_priority(&account).map(|entry| entry.priority);
        self.remove_blocking(&account);
        let sequence = self.next_sequence();
        self.blocking.insert(
            account,
            BlockingEntry {
                dependency,
                original,
                sequence,
            },
        );
        self.blocking_order.insert(sequence, account);
        self.dependents.entry(dependency).or_default().insert(account);
        self.trim_overflow();
    }

    /// Move `account` back to the priority set if it is blocked on `hash`
    /// (or on anything, when `hash` is `None`).
    pub fn unblock(&mut self, account: Account, hash: Option<BlockHash>) -> bool {
        let Some(existing) = self.blocking.get(&account) else {
            return false;
        };
        if hash.is_some_and(|hash| hash != existing.dependency) {
            return false;
        }
        let Some(entry) = self.remove_blocking(&account) else {
            return false;
        };
        self.insert_priority(account, entry.original.unwrap_or(Self::PRIORITY_INITIAL));
        self.trim_overflow();
        true
    }

    /// Unblock every account waiting on `dependency`.
    pub fn unblock_dependency(&mut self, dependency: &BlockHash) -> Vec<Account> {
        let accounts: Vec<Account> = self
            .dependents
            .get(dependency)
            .map(|accounts| accounts.iter().copied().collect())
            .unwrap_or_default();
        accounts
            .into_iter()
            .filter(|account| self.unblock(*account, Some(*dependency)))
            .collect()
    }

    pub fn timestamp_set(&mut self, account: &Account, now: Instant) {
        if let Some(entry) = self.priorities.get_mut(account) {
            entry.timestamp = Some(now);
        }
    }

    pub fn timestamp_reset(&mut self, account: &Account) {
        if let Some(entry) = self.priorities.get_mut(account) {
            entry.timestamp = None;
        }
    }

    fn trim_overflow(&mut self) {
        while self.priorities.len() > self.config.priorities_max {
            let Some((_, oldest)) = self.priority_order.first_key_value() else {
                break;
            };
            let oldest = *oldest;
            self.remove_priority(&oldest);
        }
        while self.blocking.len() > self.config.blocking_max {
            let Some((_, oldest)) = self.blocking_order.first_key_value() else {
                break;
            };
            let oldest = *oldest;
            self.remove_blocking(&oldest);
        }
    }

    /// Sample a few prioritized accounts outside their cooldown and return
    /// the one with the highest priority.
    pub fn next(&self, now: Instant) -> Option<Account> {
        if self.sample.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let mut best: Option<(f64, Account)> = None;
        for _ in 0..self.config.consideration_count {
            let account = self.sample[rng.gen_range(0..self.sample.len())];
            let Some(entry) = self.priorities.get(&account) else {
                continue;
            };
            let cooling = entry
                .timestamp
                .is_some_and(|ts| now.saturating_duration_since(ts) < self.config.cooldown);
            if cooling {
                continue;
            }
            if best.map_or(true, |(priority, _)| entry.priority > priority) {
                best = Some((entry.priority, account));
            }
        }
        best.map(|(_, account)| account)
    }

    pub fn priority(&self, account: &Account) -> Option<f64> {
        self.priorities.get(account).map(|entry| entry.priority)
    }

    pub fn blocked(&self, account: &Account) -> bool {
        self.blocking.contains_key(account)
    }

    pub fn prioritized(&self, account: &Account) -> bool {
        self.priorities.contains_key(account)
    }

    pub fn priority_len(&self) -> usize {
        self.priorities.len()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocking.len()
    }
}
