//! Election schedulers.
//!
//! Blocks reach active elections through one of four doors: the priority
//! buckets, hints from the vote cache, optimistic activation of long
//! unconfirmed chains, or an explicit manual request.

mod hinted;
mod manual;
mod optimistic;
mod priority;

pub use hinted::HintedScheduler;
pub use manual::ManualScheduler;
pub use optimistic::OptimisticScheduler;
pub use priority::PriorityScheduler;

use std::sync::Arc;

use lattice_ledger::Ledger;
use lattice_store::Transaction;
use lattice_types::{Account, Block, SavedBlock};
use lattice_utils::Stats;

use crate::active_elections::ActiveElections;
use crate::config::{HintedSchedulerConfig, OptimisticSchedulerConfig, PrioritySchedulerConfig};
use crate::error::ConsensusError;
use crate::online_reps::OnlineReps;

pub struct ElectionSchedulers {
    ledger: Arc<Ledger>,
    pub priority: Arc<PriorityScheduler>,
    pub hinted: Arc<HintedScheduler>,
    pub optimistic: Arc<OptimisticScheduler>,
    pub manual: Arc<ManualScheduler>,
}

impl ElectionSchedulers {
    pub fn new(
        priority: PrioritySchedulerConfig,
        hinted: HintedSchedulerConfig,
        optimistic: OptimisticSchedulerConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        online_reps: Arc<OnlineReps>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            priority: Arc::new(PriorityScheduler::new(
                priority,
                Arc::clone(&ledger),
                Arc::clone(&active),
                Arc::clone(&stats),
            )),
            hinted: Arc::new(HintedScheduler::new(
                hinted,
                Arc::clone(&ledger),
                Arc::clone(&active),
                online_reps,
                Arc::clone(&stats),
            )),
            optimistic: Arc::new(OptimisticScheduler::new(
                optimistic,
                Arc::clone(&ledger),
                Arc::clone(&active),
                Arc::clone(&stats),
            )),
            manual: Arc::new(ManualScheduler::new(active, stats)),
            ledger,
        }
    }

    pub fn start(&self) -> Result<(), ConsensusError> {
        self.priority.start()?;
        self.hinted.start()?;
        self.optimistic.start()?;
        self.manual.start()
    }

    pub fn stop(&self) {
        self.priority.stop();
        self.hinted.stop();
        self.optimistic.stop();
        self.manual.stop();
    }

    /// Offer `account` to the priority and optimistic schedulers.
    pub fn activate(&self, txn: &dyn Transaction, account: &Account) -> bool {
        let mut activated = self.priority.activate(txn, account);
        if let Some(info) = self.ledger.account_info(txn, account) {
            let conf = self.ledger.confirmation_height(txn, account);
            activated |= self.optimistic.activate(account, &info, &conf);
        }
        activated
    }

    pub fn activate_successors(&self, txn: &dyn Transaction, block: &SavedBlock) -> bool {
        self.priority.activate_successors(txn, block)
    }

    pub fn add_manual(&self, block: Block) {
        self.manual.push(block);
    }

    /// Wake the queue-driven schedulers after election vacancy changed.
    pub fn notify(&self) {
        self.priority.notify();
        self.optimistic.notify();
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.optimistic.len() + self.manual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
