//! Receivable entries, keyed by (destination, send hash).

use lattice_types::{Account, BlockHash, PendingInfo, PendingKey};

use crate::iterator::StoreIterator;
use crate::table::TypedTable;
use crate::transaction::Transaction;

pub type PendingStore = TypedTable<PendingKey, PendingInfo>;

impl TypedTable<PendingKey, PendingInfo> {
    /// Every receivable entry of `account`, in send-hash order.
    pub fn iter_account<'a>(
        &self,
        txn: &'a dyn Transaction,
        account: &Account,
    ) -> StoreIterator<'a, PendingKey, PendingInfo> {
        let start = PendingKey::new(*account, BlockHash::ZERO);
        let next = account.next();
        let end = (!next.is_zero()).then(|| PendingKey::new(next, BlockHash::ZERO));
        self.iter_range(txn, &start, end.as_ref())
    }

    pub fn any(&self, txn: &dyn Transaction, account: &Account) -> bool {
        self.iter_account(txn, account).next().is_some()
    }
}
