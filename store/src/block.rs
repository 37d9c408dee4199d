//! Blocks with their sidebands, keyed by hash.

use lattice_types::{BlockHash, SavedBlock};
use rand::RngCore;

use crate::table::TypedTable;
use crate::transaction::{Transaction, WriteTransaction};

pub type BlockStore = TypedTable<BlockHash, SavedBlock>;

impl TypedTable<BlockHash, SavedBlock> {
    pub fn put_block(&self, txn: &mut WriteTransaction, block: &SavedBlock) {
        self.put(txn, &block.hash(), block);
    }

    pub fn successor(&self, txn: &dyn Transaction, hash: &BlockHash) -> Option<BlockHash> {
        self.get(txn, hash)
            .map(|b| b.successor())
            .filter(|s| !s.is_zero())
    }

    pub fn successor_clear(&self, txn: &mut WriteTransaction, hash: &BlockHash) {
        if let Some(mut block) = self.get(txn, hash) {
            block.sideband.successor = BlockHash::ZERO;
            self.put(txn, hash, &block);
        }
    }

    pub fn set_successor(&self, txn: &mut WriteTransaction, hash: &BlockHash, successor: BlockHash) {
        if let Some(mut block) = self.get(txn, hash) {
            block.sideband.successor = successor;
            self.put(txn, hash, &block);
        }
    }

    /// A block chosen uniformly over the key space.
    pub fn random(&self, txn: &dyn Transaction) -> Option<SavedBlock> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.iter_from(txn, &BlockHash::new(bytes))
            .next()
            .or_else(|| self.iter(txn).next())
            .map(|(_, block)| block)
    }
}
