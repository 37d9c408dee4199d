use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use lattice_store::WriteTransaction;
use lattice_types::{BlockHash, ConfirmationHeightInfo, SavedBlock};
use lattice_utils::{DetailType, StatType};

use crate::ledger::Ledger;

/// Raises confirmation heights so that a block and all of its dependencies
/// become cemented, dependencies first.
pub(crate) struct BlockCementer<'a> {
    ledger: &'a Ledger,
}

impl<'a> BlockCementer<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    pub(crate) fn confirm(
        &self,
        txn: &mut WriteTransaction,
        hash: BlockHash,
        max_blocks: usize,
    ) -> Vec<SavedBlock> {
        let ledger = self.ledger;
        let mut result = Vec::new();
        let mut stack = VecDeque::new();
        stack.push_back(hash);

        while let Some(&top) = stack.back() {
            let Some(block) = ledger.block(&*txn, &top) else {
                tracing::warn!(hash = %top, "dependency missing while cementing");
                break;
            };

            for dependent in ledger.dependent_blocks(&block) {
                if !dependent.is_zero() && !ledger.block_confirmed(&*txn, &dependent) {
                    stack.push_back(dependent);
                    // Forget the bottom of the tree rather than grow without bound.
                    if stack.len() > max_blocks {
                        stack.pop_front();
                    }
                }
            }

            if stack.back() == Some(&top) {
                stack.pop_back();
                if !ledger.block_confirmed(&*txn, &top) {
                    ledger.store.confirmation_height.put(
                        txn,
                        &block.account(),
                        &ConfirmationHeightInfo::new(block.height(), top),
                    );
                    ledger.cache.cemented_count.fetch_add(1, Ordering::SeqCst);
                    result.push(block);
                }
            }

            if result.len() >= max_blocks {
                break;
            }
        }

        if !result.is_empty() {
            ledger.stats.add(
                StatType::ConfirmationHeight,
                DetailType::BlocksConfirmed,
                result.len() as u64,
            );
        }
        result
    }
}
