//! Representative tiers by share of trended online weight.
//!
//! Tiers decide how much vote-processor queue space a representative gets;
//! heavier representatives keep getting their votes through when the queue
//! fills up.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, NetworkConstants};
use lattice_utils::{DetailType, StatType, Stats};

use crate::error::{spawn_named, ConsensusError};
use crate::online_reps::OnlineReps;

/// Higher tier means higher priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepTier {
    /// Below 0.1% of online weight; not a principal representative.
    None,
    /// 0.1% to 1%.
    Tier1,
    /// 1% to 5%.
    Tier2,
    /// Above 5%.
    Tier3,
}

impl RepTier {
    pub fn detail(&self) -> DetailType {
        match self {
            RepTier::None => DetailType::TierNone,
            RepTier::Tier1 => DetailType::Tier1,
            RepTier::Tier2 => DetailType::Tier2,
            RepTier::Tier3 => DetailType::Tier3,
        }
    }
}

#[derive(Default)]
struct Tiers {
    tier1: HashSet<Account>,
    tier2: HashSet<Account>,
    tier3: HashSet<Account>,
}

struct TiersState {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    stats: Arc<Stats>,
    tiers: Mutex<Tiers>,
}

impl TiersState {
    fn calculate(&self) {
        let trended = self.online_reps.trended_or_minimum().number();
        let threshold = |per_mille: u128| Amount::raw(trended / 1000 * per_mille);
        let (t1, t2, t3) = (threshold(1), threshold(10), threshold(50));

        let mut next = Tiers::default();
        let mut ignored = 0u64;
        for (rep, weight) in self.ledger.rep_weights.snapshot() {
            if weight > t1 {
                next.tier1.insert(rep);
                if weight > t2 {
                    next.tier2.insert(rep);
                    if weight > t3 {
                        next.tier3.insert(rep);
                    }
                }
            } else {
                ignored += 1;
            }
        }
        self.stats.add(StatType::RepTiers, DetailType::Processed, next.tier1.len() as u64);
        self.stats.add(StatType::RepTiers, DetailType::Ignored, ignored);
        tracing::debug!(
            tier1 = next.tier1.len(),
            tier2 = next.tier2.len(),
            tier3 = next.tier3.len(),
            "representative tiers updated"
        );
        *self.tiers.lock().unwrap() = next;
    }
}

pub struct RepTiers {
    interval: Duration,
    state: Arc<TiersState>,
    thread: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<Mutex<bool>>,
    condition: Arc<Condvar>,
}

impl RepTiers {
    pub fn new(
        ledger: Arc<Ledger>,
        online_reps: Arc<OnlineReps>,
        network: &NetworkConstants,
        stats: Arc<Stats>,
    ) -> Self {
        let interval = if network.is_dev() {
            Duration::from_millis(500)
        } else {
            Duration::from_secs(10 * 60)
        };
        Self {
            interval,
            state: Arc::new(TiersState {
                ledger,
                online_reps,
                stats,
                tiers: Mutex::new(Tiers::default()),
            }),
            thread: Mutex::new(None),
            stopped: Arc::new(Mutex::new(false)),
            condition: Arc::new(Condvar::new()),
        }
    }

    pub fn start(&self) -> Result<(), ConsensusError> {
        let state = Arc::clone(&self.state);
        let stopped = Arc::clone(&self.stopped);
        let condition = Arc::clone(&self.condition);
        let interval = self.interval;
        let handle = spawn_named("rep tiers", move || {
            let mut guard = stopped.lock().unwrap();
            while !*guard {
                drop(guard);
                state.calculate();
                guard = stopped.lock().unwrap();
                guard = condition
                    .wait_timeout_while(guard, interval, |stop| !*stop)
                    .unwrap()
                    .0;
            }
        })?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Recompute the tier sets now.
    pub fn calculate_tiers(&self) {
        self.state.calculate();
    }

    pub fn tier(&self, representative: &Account) -> RepTier {
        let tiers = self.state.tiers.lock().unwrap();
        if tiers.tier3.contains(representative) {
            RepTier::Tier3
        } else if tiers.tier2.contains(representative) {
            RepTier::Tier2
        } else if tiers.tier1.contains(representative) {
            RepTier::Tier1
        } else {
            RepTier::None
        }
    }
}
