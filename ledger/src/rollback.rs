//! Undoing blocks.
//!
//! Rolling back a block removes it and every block that depends on it: its
//! successors in the same account, and, for sends that were already
//! received, the receiving chain in the destination account.

use std::sync::atomic::Ordering;

use lattice_store::WriteTransaction;
use lattice_types::{
    AccountInfo, BlockHash, PendingInfo, PendingKey, SavedBlock, unix_millis,
};

use crate::error::LedgerError;
use crate::ledger::Ledger;

enum RollbackStep {
    /// The head can go.
    RollBackBlock,
    /// The head is a send already received; the receiving chain goes first.
    RequestDependencyRollback(BlockHash),
}

pub(crate) struct RollbackPerformer<'a> {
    ledger: &'a Ledger,
    txn: &'a mut WriteTransaction,
    rolled_back: Vec<SavedBlock>,
}

impl<'a> RollbackPerformer<'a> {
    pub(crate) fn new(ledger: &'a Ledger, txn: &'a mut WriteTransaction) -> Self {
        Self {
            ledger,
            txn,
            rolled_back: Vec::new(),
        }
    }

    pub(crate) fn roll_back(mut self, hash: &BlockHash) -> Result<Vec<SavedBlock>, LedgerError> {
        // Cementing is closed under dependencies: nothing that depends on an
        // uncemented block can be cemented, so checking the target suffices.
        if !self.ledger.block_exists(&*self.txn, hash) {
            return Err(LedgerError::BlockNotFound(*hash));
        }
        if self.ledger.block_confirmed(&*self.txn, hash) {
            return Err(LedgerError::BlockConfirmed(*hash));
        }
        self.roll_back_block_and_successors(hash)?;
        Ok(self.rolled_back)
    }

    fn roll_back_block_and_successors(&mut self, hash: &BlockHash) -> Result<(), LedgerError> {
        let block = self.load_block(hash)?;
        while self.ledger.block_exists(&*self.txn, hash) {
            let info = self
                .ledger
                .account_info(&*self.txn, &block.account())
                .ok_or(LedgerError::AccountNotFound(block.account()))?;
            let head = self.load_block(&info.head)?;
            if self.ledger.block_confirmed(&*self.txn, &info.head) {
                return Err(LedgerError::BlockConfirmed(info.head));
            }
            match self.plan(&head)? {
                RollbackStep::RollBackBlock => {
                    self.roll_back_head(&head, &info);
                    self.ledger.count_rollback(&head);
                    self.rolled_back.push(head);
                }
                RollbackStep::RequestDependencyRollback(dependency) => {
                    self.roll_back_block_and_successors(&dependency)?;
                }
            }
        }
        Ok(())
    }

    fn plan(&self, head: &SavedBlock) -> Result<RollbackStep, LedgerError> {
        let Some(destination) = head.destination() else {
            return Ok(RollbackStep::RollBackBlock);
        };
        let key = PendingKey::new(destination, head.hash());
        if self.ledger.pending_info(&*self.txn, &key).is_some() {
            return Ok(RollbackStep::RollBackBlock);
        }
        // Received already: unwind the destination until the entry reappears.
        let destination_head = self
            .ledger
            .latest(&*self.txn, &destination)
            .ok_or(LedgerError::AccountNotFound(destination))?;
        Ok(RollbackStep::RequestDependencyRollback(destination_head))
    }

    fn roll_back_head(&mut self, head: &SavedBlock, info: &AccountInfo) {
        let ledger = self.ledger;
        let hash = head.hash();
        let account = head.account();
        let previous = if head.previous().is_zero() {
            None
        } else {
            ledger.block(&*self.txn, &head.previous())
        };
        let previous_balance = previous
            .as_ref()
            .map(|b| b.balance())
            .unwrap_or_default();

        if let Some(destination) = head.destination() {
            ledger
                .store
                .pending
                .del(self.txn, &PendingKey::new(destination, hash));
        }
        if head.is_receive() {
            if let Some(source) = head.source() {
                let source_account = ledger.account(&*self.txn, &source).unwrap_or_default();
                let amount = head.balance().saturating_sub(previous_balance);
                ledger.store.pending.put(
                    self.txn,
                    &PendingKey::new(account, source),
                    &PendingInfo::new(source_account, amount, head.sideband.source_epoch),
                );
            }
        }

        match &previous {
            Some(previous) => {
                let rep_block = ledger.representative_block(&*self.txn, &previous.hash());
                let representative = ledger
                    .block(&*self.txn, &rep_block)
                    .and_then(|b| b.representative())
                    .unwrap_or(info.representative);
                let new_info = AccountInfo {
                    head: previous.hash(),
                    representative,
                    open_block: info.open_block,
                    balance: previous_balance,
                    modified: unix_millis() / 1000,
                    block_count: info.block_count.saturating_sub(1),
                    epoch: previous.epoch(),
                };
                ledger.rep_weights.transfer(
                    info.representative,
                    info.balance,
                    representative,
                    previous_balance,
                );
                ledger.store.account.put(self.txn, &account, &new_info);
                ledger.store.block.successor_clear(self.txn, &previous.hash());
            }
            None => {
                ledger.rep_weights.sub(info.representative, info.balance);
                ledger.store.account.del(self.txn, &account);
                ledger.cache.account_count.fetch_sub(1, Ordering::SeqCst);
            }
        }

        ledger.store.block.del(self.txn, &hash);
        ledger.cache.block_count.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(%hash, subtype = head.subtype().as_str(), "block rolled back");
    }

    fn load_block(&self, hash: &BlockHash) -> Result<SavedBlock, LedgerError> {
        self.ledger
            .block(&*self.txn, hash)
            .ok_or(LedgerError::BlockNotFound(*hash))
    }
}
