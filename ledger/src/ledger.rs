use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_store::{Store, Transaction, WriteTransaction};
use lattice_types::{
    Account, AccountInfo, Amount, Block, BlockHash, ConfirmationHeightInfo, Link, PendingInfo,
    PendingKey, QualifiedRoot, Root, SavedBlock, unix_millis,
};
use lattice_utils::{DetailType, StatType, Stats};

use crate::block_status::BlockStatus;
use crate::cementer::BlockCementer;
use crate::constants::LedgerConstants;
use crate::error::LedgerError;
use crate::rep_weights::RepWeights;
use crate::rollback::RollbackPerformer;
use crate::validation::{BlockValidator, InsertInstructions};
use crate::write_queue::WriteQueue;

/// Counters kept in memory so hot paths never scan tables.
#[derive(Default)]
pub struct LedgerCache {
    pub block_count: AtomicU64,
    /// Sum of confirmation heights over all accounts.
    pub cemented_count: AtomicU64,
    pub account_count: AtomicU64,
    pub pruned_count: AtomicU64,
}

pub struct Ledger {
    pub store: Arc<Store>,
    pub constants: LedgerConstants,
    pub rep_weights: RepWeights,
    pub write_queue: Arc<WriteQueue>,
    pub cache: LedgerCache,
    pub(crate) stats: Arc<Stats>,
}

impl Ledger {
    /// Open the ledger, writing genesis into an empty store.
    pub fn new(
        store: Arc<Store>,
        constants: LedgerConstants,
        stats: Arc<Stats>,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            store,
            constants,
            rep_weights: RepWeights::new(),
            write_queue: Arc::new(WriteQueue::new()),
            cache: LedgerCache::default(),
            stats,
        };
        ledger.initialize_genesis()?;
        ledger.rebuild_cache();
        Ok(ledger)
    }

    fn initialize_genesis(&self) -> Result<(), LedgerError> {
        let mut txn = self.store.tx_begin_write();
        if self.store.account.count(&txn) > 0 {
            return Ok(());
        }
        let genesis = &self.constants.genesis;
        let hash = genesis.hash();
        let account = self.constants.genesis_account;
        self.store.block.put_block(&mut txn, genesis);
        self.store.account.put(
            &mut txn,
            &account,
            &AccountInfo {
                head: hash,
                representative: account,
                open_block: hash,
                balance: self.constants.genesis_amount,
                modified: unix_millis() / 1000,
                block_count: 1,
                epoch: genesis.epoch(),
            },
        );
        self.store.confirmation_height.put(
            &mut txn,
            &account,
            &ConfirmationHeightInfo::new(1, hash),
        );
        txn.commit()?;
        tracing::info!(%hash, network = self.constants.network.as_str(), "genesis written");
        Ok(())
    }

    /// Recompute counters and representative weights from committed state.
    pub fn rebuild_cache(&self) {
        let txn = self.store.tx_begin_read();
        self.cache
            .block_count
            .store(self.store.block.count(&txn), Ordering::SeqCst);
        self.cache
            .account_count
            .store(self.store.account.count(&txn), Ordering::SeqCst);
        self.cache
            .pruned_count
            .store(self.store.pruned.count(&txn), Ordering::SeqCst);
        let cemented: u64 = self
            .store
            .confirmation_height
            .iter(&txn)
            .map(|(_, info)| info.height)
            .sum();
        self.cache.cemented_count.store(cemented, Ordering::SeqCst);

        self.rep_weights.clear();
        self.store.account.for_each_par(|iter| {
            let mut weights: HashMap<Account, Amount> = HashMap::new();
            for (_, info) in iter {
                let entry = weights.entry(info.representative).or_default();
                *entry = entry.saturating_add(info.balance);
            }
            self.rep_weights.merge(weights);
        });
        tracing::debug!(
            blocks = self.block_count(),
            cemented = self.cemented_count(),
            accounts = self.account_count(),
            representatives = self.rep_weights.len(),
            "ledger cache built"
        );
    }

    // Mutations

    /// Validate `block` and apply it.
    pub fn process(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
    ) -> Result<SavedBlock, BlockStatus> {
        let result = BlockValidator::load(&self.constants, &self.store, &*txn, block)
            .validate()
            .map(|instructions| self.insert(txn, block, instructions));
        let status = match &result {
            Ok(_) => BlockStatus::Progress,
            Err(status) => *status,
        };
        self.stats.inc(StatType::Ledger, status.into());
        tracing::trace!(hash = %block.hash(), ?status, "block processed");
        result
    }

    fn insert(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        instructions: InsertInstructions,
    ) -> SavedBlock {
        let saved = SavedBlock::new(block.clone(), instructions.set_sideband);
        let hash = saved.hash();
        self.store.block.put_block(txn, &saved);
        if !block.previous().is_zero() {
            self.store.block.set_successor(txn, &block.previous(), hash);
        }
        if let Some(key) = &instructions.delete_pending {
            self.store.pending.del(txn, key);
        }
        if let Some((key, info)) = &instructions.insert_pending {
            self.store.pending.put(txn, key, info);
        }
        self.store
            .account
            .put(txn, &instructions.account, &instructions.set_account_info);

        let new_info = &instructions.set_account_info;
        match &instructions.old_account_info {
            Some(old) => self.rep_weights.transfer(
                old.representative,
                old.balance,
                new_info.representative,
                new_info.balance,
            ),
            None => {
                self.rep_weights
                    .add(new_info.representative, new_info.balance);
                self.cache.account_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.cache.block_count.fetch_add(1, Ordering::SeqCst);
        saved
    }

    /// Remove `hash` and everything that depends on it.
    ///
    /// Cemented blocks are refused before anything is touched.
    pub fn rollback(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
    ) -> Result<Vec<SavedBlock>, LedgerError> {
        let result = RollbackPerformer::new(self, txn).roll_back(hash);
        if let Err(LedgerError::BlockConfirmed(confirmed)) = &result {
            tracing::error!(target_hash = %hash, %confirmed, "rollback refused: block is cemented");
        }
        result
    }

    /// Cement `hash` and all of its dependencies.
    pub fn confirm(&self, txn: &mut WriteTransaction, hash: BlockHash) -> Vec<SavedBlock> {
        self.confirm_max(txn, hash, usize::MAX)
    }

    /// Like [`Ledger::confirm`] but returns after at most `max_blocks`.
    pub fn confirm_max(
        &self,
        txn: &mut WriteTransaction,
        hash: BlockHash,
        max_blocks: usize,
    ) -> Vec<SavedBlock> {
        BlockCementer::new(self).confirm(txn, hash, max_blocks)
    }

    /// Raise the confirmation height of `account` to `height`.
    ///
    /// Lower or equal heights are ignored. Returns how many blocks were
    /// newly cemented.
    pub fn write_confirmation_height(
        &self,
        txn: &mut WriteTransaction,
        account: &Account,
        height: u64,
        frontier: BlockHash,
    ) -> u64 {
        let current = self.confirmation_height(&*txn, account);
        if height <= current.height {
            return 0;
        }
        self.store.confirmation_height.put(
            txn,
            account,
            &ConfirmationHeightInfo::new(height, frontier),
        );
        let added = height - current.height;
        self.cache.cemented_count.fetch_add(added, Ordering::SeqCst);
        added
    }

    /// Replace the bodies of cemented blocks from `hash` backwards by pruned
    /// markers. The account head and genesis are kept.
    pub fn prune(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
        batch_size: u64,
    ) -> Result<u64, LedgerError> {
        let mut current = *hash;
        let mut pruned = 0u64;
        while !current.is_zero() && current != self.constants.genesis_hash() {
            let Some(block) = self.store.block.get(&*txn, &current) else {
                if self.store.pruned.exists(&*txn, &current) {
                    break;
                }
                return Err(LedgerError::BlockNotFound(current));
            };
            if !self.block_confirmed(&*txn, &current) {
                return Err(LedgerError::BlockNotFound(current));
            }
            let is_head = self
                .account_info(&*txn, &block.account())
                .map(|info| info.head == current)
                .unwrap_or(false);
            if !is_head {
                self.store.block.del(txn, &current);
                self.store.pruned.put(txn, &current, &());
                self.cache.block_count.fetch_sub(1, Ordering::SeqCst);
                self.cache.pruned_count.fetch_add(1, Ordering::SeqCst);
                pruned += 1;
                if batch_size > 0 && pruned % batch_size == 0 {
                    txn.refresh()?;
                }
            }
            current = block.previous();
        }
        Ok(pruned)
    }

    // Accessors

    pub fn account_info(&self, txn: &dyn Transaction, account: &Account) -> Option<AccountInfo> {
        self.store.account.get(txn, account)
    }

    pub fn account_balance(&self, txn: &dyn Transaction, account: &Account) -> Amount {
        self.account_info(txn, account)
            .map(|info| info.balance)
            .unwrap_or_default()
    }

    /// Balance after the block `hash`.
    pub fn balance(&self, txn: &dyn Transaction, hash: &BlockHash) -> Option<Amount> {
        if hash.is_zero() {
            return None;
        }
        self.block(txn, hash).map(|b| b.balance())
    }

    /// Sum of everything sent to `account` and not yet received.
    pub fn account_receivable(&self, txn: &dyn Transaction, account: &Account) -> Amount {
        self.store
            .pending
            .iter_account(txn, account)
            .map(|(_, info)| info.amount)
            .sum()
    }

    pub fn receivable(
        &self,
        txn: &dyn Transaction,
        account: &Account,
    ) -> Vec<(PendingKey, PendingInfo)> {
        self.store.pending.iter_account(txn, account).collect()
    }

    pub fn weight(&self, representative: &Account) -> Amount {
        self.rep_weights.weight(representative)
    }

    pub fn pending_info(&self, txn: &dyn Transaction, key: &PendingKey) -> Option<PendingInfo> {
        self.store.pending.get(txn, key)
    }

    pub fn block(&self, txn: &dyn Transaction, hash: &BlockHash) -> Option<SavedBlock> {
        self.store.block.get(txn, hash)
    }

    pub fn block_exists(&self, txn: &dyn Transaction, hash: &BlockHash) -> bool {
        self.store.block.exists(txn, hash)
    }

    pub fn block_or_pruned_exists(&self, txn: &dyn Transaction, hash: &BlockHash) -> bool {
        self.store.pruned.exists(txn, hash) || self.store.block.exists(txn, hash)
    }

    /// Pruned blocks count as confirmed.
    pub fn block_confirmed(&self, txn: &dyn Transaction, hash: &BlockHash) -> bool {
        if self.store.pruned.exists(txn, hash) {
            return true;
        }
        match self.block(txn, hash) {
            Some(block) => self.confirmation_height(txn, &block.account()).height >= block.height(),
            None => false,
        }
    }

    pub fn confirmation_height(
        &self,
        txn: &dyn Transaction,
        account: &Account,
    ) -> ConfirmationHeightInfo {
        self.store
            .confirmation_height
            .get(txn, account)
            .unwrap_or_default()
    }

    pub fn latest(&self, txn: &dyn Transaction, account: &Account) -> Option<BlockHash> {
        self.account_info(txn, account).map(|info| info.head)
    }

    /// Root the next block of `account` would have.
    pub fn latest_root(&self, txn: &dyn Transaction, account: &Account) -> Root {
        match self.latest(txn, account) {
            Some(head) => head.into(),
            None => (*account).into(),
        }
    }

    /// The block occupying the chain slot `root`, if any.
    pub fn successor(&self, txn: &dyn Transaction, root: &QualifiedRoot) -> Option<BlockHash> {
        if root.previous.is_zero() {
            let account = Account::new(*root.root.as_bytes());
            self.account_info(txn, &account).map(|info| info.open_block)
        } else {
            self.store.block.successor(txn, &root.previous)
        }
    }

    pub fn account(&self, txn: &dyn Transaction, hash: &BlockHash) -> Option<Account> {
        self.block(txn, hash).map(|b| b.account())
    }

    /// Amount moved by the block `hash`.
    pub fn amount(&self, txn: &dyn Transaction, hash: &BlockHash) -> Option<Amount> {
        let block = self.block(txn, hash)?;
        if block.previous().is_zero() {
            return Some(block.balance());
        }
        let previous = self.balance(txn, &block.previous())?;
        let balance = block.balance();
        Some(if balance > previous {
            balance - previous
        } else {
            previous - balance
        })
    }

    /// Hash of the closest block at or before `hash` that names a representative.
    pub fn representative_block(&self, txn: &dyn Transaction, hash: &BlockHash) -> BlockHash {
        let mut current = *hash;
        while let Some(block) = self.block(txn, &current) {
            if block.representative().is_some() {
                return current;
            }
            current = block.previous();
        }
        BlockHash::ZERO
    }

    /// Previous block and, for receives, the source block.
    pub fn dependent_blocks(&self, block: &SavedBlock) -> [BlockHash; 2] {
        let source = if block.account() == self.constants.genesis_account && block.block.is_open()
        {
            BlockHash::ZERO
        } else {
            block.source().unwrap_or_default()
        };
        [block.previous(), source]
    }

    pub fn dependents_confirmed(&self, txn: &dyn Transaction, block: &SavedBlock) -> bool {
        self.dependent_blocks(block)
            .iter()
            .all(|hash| hash.is_zero() || self.block_confirmed(txn, hash))
    }

    /// Whether every block `block` depends on is present.
    pub fn could_fit(&self, txn: &dyn Transaction, block: &Block) -> bool {
        let previous = block.previous();
        if !previous.is_zero() && !self.block_or_pruned_exists(txn, &previous) {
            return false;
        }
        let source = match block {
            Block::State(state) => {
                if state.link.is_zero() || self.is_epoch_link(&state.link) {
                    return true;
                }
                // Sends carry an account in the link; only receives depend on it.
                match self.balance(txn, &previous) {
                    Some(prev) if state.balance < prev => return true,
                    _ => state.link.into(),
                }
            }
            _ => match block.source_field() {
                Some(source) => source,
                None => return true,
            },
        };
        self.block_or_pruned_exists(txn, &source)
    }

    pub fn is_epoch_link(&self, link: &Link) -> bool {
        self.constants.epochs.is_epoch_link(link)
    }

    pub fn random_block(&self, txn: &dyn Transaction) -> Option<SavedBlock> {
        self.store.block.random(txn)
    }

    pub fn cemented_count(&self) -> u64 {
        self.cache.cemented_count.load(Ordering::SeqCst)
    }

    pub fn block_count(&self) -> u64 {
        self.cache.block_count.load(Ordering::SeqCst)
    }

    pub fn account_count(&self) -> u64 {
        self.cache.account_count.load(Ordering::SeqCst)
    }

    pub fn pruned_count(&self) -> u64 {
        self.cache.pruned_count.load(Ordering::SeqCst)
    }

    /// Blocks present but not yet cemented.
    pub fn unconfirmed_count(&self) -> u64 {
        (self.block_count() + self.pruned_count()).saturating_sub(self.cemented_count())
    }

    pub(crate) fn count_rollback(&self, block: &SavedBlock) {
        let detail = match block.subtype() {
            lattice_types::BlockSubType::Send => DetailType::Send,
            lattice_types::BlockSubType::Receive => DetailType::Receive,
            lattice_types::BlockSubType::Open => DetailType::Open,
            lattice_types::BlockSubType::Change => DetailType::Change,
            lattice_types::BlockSubType::Epoch => DetailType::Epoch,
        };
        self.stats.inc(StatType::Rollback, detail);
    }
}
