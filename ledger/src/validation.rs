//! Block validation.
//!
//! Everything the rules need is loaded up front; the rules then run in a
//! fixed order and the first failure decides the result. A block that passes
//! yields the complete set of changes to apply.

use lattice_crypto::validate_block_signature;
use lattice_store::{Store, Transaction};
use lattice_types::{
    Account, AccountInfo, Amount, Block, BlockDetails, BlockHash, BlockSideband, Epoch,
    PendingInfo, PendingKey, SavedBlock, unix_millis,
};

use crate::block_status::BlockStatus;
use crate::constants::LedgerConstants;

/// The writes that apply one validated block.
#[derive(Debug)]
pub(crate) struct InsertInstructions {
    pub account: Account,
    pub old_account_info: Option<AccountInfo>,
    pub set_account_info: AccountInfo,
    pub delete_pending: Option<PendingKey>,
    pub insert_pending: Option<(PendingKey, PendingInfo)>,
    pub set_sideband: BlockSideband,
}

pub(crate) struct BlockValidator<'a> {
    block: &'a Block,
    hash: BlockHash,
    constants: &'a LedgerConstants,
    block_exists: bool,
    account: Account,
    previous_block: Option<SavedBlock>,
    old_account_info: Option<AccountInfo>,
    pending_receive_info: Option<PendingInfo>,
    any_pending_exists: bool,
    source_block_exists: bool,
    now: u64,
}

impl<'a> BlockValidator<'a> {
    pub(crate) fn load(
        constants: &'a LedgerConstants,
        store: &Store,
        txn: &dyn Transaction,
        block: &'a Block,
    ) -> Self {
        let hash = block.hash();
        let block_exists =
            store.block.exists(txn, &hash) || store.pruned.exists(txn, &hash);
        let previous_block = if block.previous().is_zero() {
            None
        } else {
            store.block.get(txn, &block.previous())
        };
        let account = match block.account_field() {
            Some(account) => account,
            None => previous_block
                .as_ref()
                .map(|b| b.account())
                .unwrap_or_default(),
        };
        let old_account_info = store.account.get(txn, &account);

        let mut validator = Self {
            block,
            hash,
            constants,
            block_exists,
            account,
            previous_block,
            old_account_info,
            pending_receive_info: None,
            any_pending_exists: false,
            source_block_exists: false,
            now: unix_millis() / 1000,
        };

        if let Some(source) = validator.source_hash() {
            validator.source_block_exists =
                store.block.exists(txn, &source) || store.pruned.exists(txn, &source);
            validator.pending_receive_info = store
                .pending
                .get(txn, &PendingKey::new(account, source));
        }
        if validator.is_epoch_block() && block.is_open() {
            validator.any_pending_exists = store.pending.any(txn, &account);
        }
        validator
    }

    pub(crate) fn validate(&self) -> Result<InsertInstructions, BlockStatus> {
        self.epoch_block_pre_checks()?;
        self.ensure_block_does_not_exist_yet()?;
        self.ensure_valid_predecessor()?;
        self.ensure_frontier_not_missing()?;
        self.ensure_valid_signature()?;
        self.ensure_block_is_not_for_burn_account()?;
        self.ensure_previous_block_exists()?;
        self.ensure_no_double_account_open()?;
        self.ensure_previous_block_is_head()?;
        self.ensure_open_block_has_link()?;
        self.ensure_no_balance_change_without_link()?;
        self.ensure_pending_receive_is_correct()?;
        self.ensure_sufficient_work()?;
        self.ensure_no_negative_amount_send()?;
        self.ensure_valid_epoch_block()?;
        Ok(self.create_instructions())
    }

    // Rules

    fn epoch_block_pre_checks(&self) -> Result<(), BlockStatus> {
        if !self.has_epoch_link() {
            return Ok(());
        }
        let epoch_signer = self.epoch_signer();
        let valid_for_account = validate_block_signature(self.block, &self.account.into());
        let valid_for_signer = epoch_signer
            .map(|signer| validate_block_signature(self.block, &signer.into()))
            .unwrap_or(false);
        if !valid_for_account && !valid_for_signer {
            return Err(BlockStatus::BadSignature);
        }
        // Epoch classification compares against the previous balance.
        if !self.block.previous().is_zero() && self.previous_block.is_none() {
            return Err(BlockStatus::GapPrevious);
        }
        Ok(())
    }

    fn ensure_block_does_not_exist_yet(&self) -> Result<(), BlockStatus> {
        if self.block_exists {
            Err(BlockStatus::Old)
        } else {
            Ok(())
        }
    }

    fn ensure_valid_predecessor(&self) -> Result<(), BlockStatus> {
        if !self.block.is_legacy() || self.block.is_open() {
            return Ok(());
        }
        match &self.previous_block {
            None => Err(BlockStatus::GapPrevious),
            Some(previous) if !self.block.valid_predecessor(previous.block.block_type()) => {
                Err(BlockStatus::BlockPosition)
            }
            Some(_) => Ok(()),
        }
    }

    fn ensure_frontier_not_missing(&self) -> Result<(), BlockStatus> {
        if self.block.is_legacy() && !self.block.is_open() && self.old_account_info.is_none() {
            Err(BlockStatus::GapPrevious)
        } else {
            Ok(())
        }
    }

    fn ensure_valid_signature(&self) -> Result<(), BlockStatus> {
        let signer = if self.is_epoch_block() {
            self.epoch_signer().unwrap_or_default()
        } else {
            self.account
        };
        if validate_block_signature(self.block, &signer.into()) {
            Ok(())
        } else {
            Err(BlockStatus::BadSignature)
        }
    }

    fn ensure_block_is_not_for_burn_account(&self) -> Result<(), BlockStatus> {
        if self.account == self.constants.burn_account {
            Err(BlockStatus::OpenedBurnAccount)
        } else {
            Ok(())
        }
    }

    fn ensure_previous_block_exists(&self) -> Result<(), BlockStatus> {
        if self.block.previous().is_zero() {
            return Ok(());
        }
        if self.old_account_info.is_none() || self.previous_block.is_none() {
            return Err(BlockStatus::GapPrevious);
        }
        Ok(())
    }

    fn ensure_no_double_account_open(&self) -> Result<(), BlockStatus> {
        if self.old_account_info.is_some() && self.block.is_open() {
            Err(BlockStatus::Fork)
        } else {
            Ok(())
        }
    }

    fn ensure_previous_block_is_head(&self) -> Result<(), BlockStatus> {
        match &self.old_account_info {
            Some(info) if info.head != self.block.previous() => Err(BlockStatus::Fork),
            _ => Ok(()),
        }
    }

    fn ensure_open_block_has_link(&self) -> Result<(), BlockStatus> {
        if let Block::State(state) = self.block {
            if state.previous.is_zero() && state.link.is_zero() {
                return Err(BlockStatus::GapSource);
            }
        }
        Ok(())
    }

    fn ensure_no_balance_change_without_link(&self) -> Result<(), BlockStatus> {
        if let Block::State(state) = self.block {
            if state.link.is_zero() && !self.is_send() && state.balance != self.old_balance() {
                return Err(BlockStatus::BalanceMismatch);
            }
        }
        Ok(())
    }

    fn ensure_pending_receive_is_correct(&self) -> Result<(), BlockStatus> {
        if !self.is_receive() {
            return Ok(());
        }
        if !self.source_block_exists {
            return Err(BlockStatus::GapSource);
        }
        let Some(pending) = &self.pending_receive_info else {
            return Err(BlockStatus::Unreceivable);
        };
        match self.block {
            Block::State(_) => {
                if self.amount_received() != pending.amount {
                    return Err(BlockStatus::BalanceMismatch);
                }
            }
            // Legacy blocks cannot receive from upgraded accounts.
            _ => {
                if pending.epoch != Epoch::Epoch0 {
                    return Err(BlockStatus::Unreceivable);
                }
            }
        }
        Ok(())
    }

    fn ensure_sufficient_work(&self) -> Result<(), BlockStatus> {
        if self
            .constants
            .work
            .is_valid_pow(self.block, &self.block_details())
        {
            Ok(())
        } else {
            Err(BlockStatus::InsufficientWork)
        }
    }

    fn ensure_no_negative_amount_send(&self) -> Result<(), BlockStatus> {
        if let Block::Send(send) = self.block {
            if send.balance > self.old_balance() {
                return Err(BlockStatus::NegativeSpend);
            }
        }
        Ok(())
    }

    fn ensure_valid_epoch_block(&self) -> Result<(), BlockStatus> {
        let Block::State(state) = self.block else {
            return Ok(());
        };
        if !self.has_epoch_link() {
            return Ok(());
        }
        if !self.is_epoch_block() {
            if !self.is_send() && state.balance != self.previous_balance() {
                return Err(BlockStatus::BalanceMismatch);
            }
            return Ok(());
        }
        match &self.old_account_info {
            Some(info) => {
                if state.representative != info.representative {
                    return Err(BlockStatus::RepresentativeMismatch);
                }
                if !Epoch::is_sequential(info.epoch, self.block_epoch_version()) {
                    return Err(BlockStatus::BlockPosition);
                }
            }
            None => {
                if !state.representative.is_zero() {
                    return Err(BlockStatus::RepresentativeMismatch);
                }
                if !self.any_pending_exists {
                    return Err(BlockStatus::GapEpochOpenPending);
                }
            }
        }
        Ok(())
    }

    // Derived values

    fn has_epoch_link(&self) -> bool {
        match self.block {
            Block::State(state) => self.constants.epochs.is_epoch_link(&state.link),
            _ => false,
        }
    }

    fn epoch_signer(&self) -> Option<Account> {
        self.constants.epochs.signer(self.block_epoch_version())
    }

    fn block_epoch_version(&self) -> Epoch {
        match self.block {
            Block::State(state) => self
                .constants
                .epochs
                .epoch(&state.link)
                .unwrap_or(Epoch::Epoch0),
            _ => Epoch::Epoch0,
        }
    }

    fn previous_balance(&self) -> Amount {
        self.previous_block
            .as_ref()
            .map(|b| b.balance())
            .unwrap_or_default()
    }

    fn old_balance(&self) -> Amount {
        self.old_account_info
            .as_ref()
            .map(|i| i.balance)
            .unwrap_or_default()
    }

    fn is_epoch_block(&self) -> bool {
        match self.block {
            Block::State(state) => {
                self.has_epoch_link() && state.balance == self.previous_balance()
            }
            _ => false,
        }
    }

    fn is_send(&self) -> bool {
        match self.block {
            Block::Send(_) => true,
            Block::State(state) => match &self.old_account_info {
                Some(info) => state.balance < info.balance,
                None => false,
            },
            _ => false,
        }
    }

    fn is_receive(&self) -> bool {
        match self.block {
            Block::Receive(_) | Block::Open(_) => true,
            Block::State(state) => {
                if self.has_epoch_link() {
                    return false;
                }
                match &self.old_account_info {
                    Some(info) => state.balance >= info.balance && !state.link.is_zero(),
                    None => true,
                }
            }
            _ => false,
        }
    }

    fn source_hash(&self) -> Option<BlockHash> {
        match self.block {
            Block::Receive(_) | Block::Open(_) => self.block.source_field(),
            Block::State(state) if self.is_receive() && !state.link.is_zero() => {
                Some(state.link.into())
            }
            _ => None,
        }
    }

    fn source_epoch(&self) -> Epoch {
        self.pending_receive_info
            .as_ref()
            .map(|p| p.epoch)
            .unwrap_or(Epoch::Epoch0)
    }

    fn epoch(&self) -> Epoch {
        if self.is_epoch_block() {
            self.block_epoch_version()
        } else {
            let old = self
                .old_account_info
                .as_ref()
                .map(|i| i.epoch)
                .unwrap_or(Epoch::Epoch0);
            old.max(self.source_epoch())
        }
    }

    fn amount_received(&self) -> Amount {
        match self.block {
            Block::Receive(_) | Block::Open(_) => self
                .pending_receive_info
                .as_ref()
                .map(|p| p.amount)
                .unwrap_or_default(),
            Block::State(state) => state.balance.saturating_sub(self.previous_balance()),
            _ => Amount::ZERO,
        }
    }

    fn amount_sent(&self) -> Amount {
        match self.block {
            Block::Send(_) | Block::State(_) => {
                let new = self.block.balance_field().unwrap_or_default();
                self.old_balance().saturating_sub(new)
            }
            _ => Amount::ZERO,
        }
    }

    fn new_balance(&self) -> Amount {
        self.old_balance()
            .saturating_add(self.amount_received())
            .saturating_sub(self.amount_sent())
    }

    fn new_representative(&self) -> Account {
        self.block.representative_field().unwrap_or_else(|| {
            self.old_account_info
                .as_ref()
                .map(|i| i.representative)
                .unwrap_or_default()
        })
    }

    fn new_block_count(&self) -> u64 {
        self.old_account_info
            .as_ref()
            .map(|i| i.block_count)
            .unwrap_or_default()
            + 1
    }

    fn block_details(&self) -> BlockDetails {
        BlockDetails::new(
            self.epoch(),
            self.is_send(),
            self.is_receive(),
            self.is_epoch_block(),
        )
    }

    fn new_pending_info(&self) -> Option<(PendingKey, PendingInfo)> {
        if !self.is_send() {
            return None;
        }
        let destination = match self.block {
            Block::Send(send) => send.destination,
            Block::State(state) => state.link.into(),
            _ => return None,
        };
        // Legacy sends stay at epoch 0 since they cannot follow an upgrade.
        let epoch = match self.block {
            Block::State(_) => self.epoch(),
            _ => Epoch::Epoch0,
        };
        Some((
            PendingKey::new(destination, self.hash),
            PendingInfo::new(self.account, self.amount_sent(), epoch),
        ))
    }

    fn create_instructions(&self) -> InsertInstructions {
        let set_account_info = AccountInfo {
            head: self.hash,
            representative: self.new_representative(),
            open_block: self
                .old_account_info
                .as_ref()
                .map(|i| i.open_block)
                .unwrap_or(self.hash),
            balance: self.new_balance(),
            modified: self.now,
            block_count: self.new_block_count(),
            epoch: self.epoch(),
        };
        InsertInstructions {
            account: self.account,
            old_account_info: self.old_account_info.clone(),
            set_account_info,
            delete_pending: self
                .pending_receive_info
                .as_ref()
                .and_then(|_| self.source_hash())
                .map(|source| PendingKey::new(self.account, source)),
            insert_pending: self.new_pending_info(),
            set_sideband: BlockSideband {
                account: self.account,
                successor: BlockHash::ZERO,
                balance: self.new_balance(),
                height: self.new_block_count(),
                timestamp: self.now,
                details: self.block_details(),
                source_epoch: self.source_epoch(),
            },
        }
    }
}
