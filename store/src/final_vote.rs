//! Final votes cast by this node: at most one hash per qualified root.

use lattice_types::{BlockHash, QualifiedRoot, Root};

use crate::table::TypedTable;
use crate::transaction::{Transaction, WriteTransaction};

pub type FinalVoteStore = TypedTable<QualifiedRoot, BlockHash>;

impl TypedTable<QualifiedRoot, BlockHash> {
    /// Record a final vote. Returns false if a different hash was already
    /// final for this root.
    pub fn put_final(&self, txn: &mut WriteTransaction, root: &QualifiedRoot, hash: &BlockHash) -> bool {
        match self.get(txn, root) {
            Some(existing) => existing == *hash,
            None => {
                self.put(txn, root, hash);
                true
            }
        }
    }

    /// Hashes voted final for any qualified root sharing `root`.
    pub fn get_root(&self, txn: &dyn Transaction, root: &Root) -> Vec<BlockHash> {
        self.iter_from(txn, &QualifiedRoot::new(*root, BlockHash::ZERO))
            .take_while(|(key, _)| key.root == *root)
            .map(|(_, hash)| hash)
            .collect()
    }

    pub fn del_root(&self, txn: &mut WriteTransaction, root: &Root) {
        let keys: Vec<QualifiedRoot> = self
            .iter_from(txn, &QualifiedRoot::new(*root, BlockHash::ZERO))
            .take_while(|(key, _)| key.root == *root)
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            self.del(txn, key);
        }
    }
}
