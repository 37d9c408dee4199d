//! Transactional table store for the lattice node.
//!
//! The node reads and writes typed tables through scoped transactions. The
//! tables sit on a byte-level [`KvEngine`]. Durable engines live in their
//! own crates; [`MemoryEngine`] is the volatile one used by tests and tools.
//! [`WriteOverlay`] holds a writer's uncommitted changes for any engine.

pub mod block;
pub mod codec;
pub mod engine;
pub mod error;
pub mod final_vote;
pub mod iterator;
pub mod memory;
pub mod overlay;
pub mod peer;
pub mod pending;
pub mod table;
pub mod transaction;
pub mod version;

use std::sync::Arc;

use lattice_types::{Account, AccountInfo, Amount, BlockHash, ConfirmationHeightInfo};

pub use block::BlockStore;
pub use codec::DbKey;
pub use engine::{KvEngine, KvRead, KvWrite, Table};
pub use error::StoreError;
pub use final_vote::FinalVoteStore;
pub use iterator::StoreIterator;
pub use memory::MemoryEngine;
pub use overlay::{Changes, TableChanges, WriteOverlay, WriterGate};
pub use peer::PeerStore;
pub use pending::PendingStore;
pub use table::TypedTable;
pub use transaction::{ReadTransaction, Transaction, WriteTransaction};
pub use version::{VersionStore, CURRENT_SCHEMA_VERSION};

pub type AccountStore = TypedTable<Account, AccountInfo>;
pub type ConfirmationHeightStore = TypedTable<Account, ConfirmationHeightInfo>;
/// Hashes of blocks whose bodies were pruned.
pub type PrunedStore = TypedTable<BlockHash, ()>;
/// Online weight samples keyed by Unix milliseconds.
pub type OnlineWeightStore = TypedTable<u64, Amount>;

pub struct Store {
    engine: Arc<dyn KvEngine>,
    pub account: AccountStore,
    pub block: BlockStore,
    pub pending: PendingStore,
    pub confirmation_height: ConfirmationHeightStore,
    pub pruned: PrunedStore,
    pub final_vote: FinalVoteStore,
    pub online_weight: OnlineWeightStore,
    pub peer: PeerStore,
    pub version: VersionStore,
}

impl Store {
    /// Open the tables on `engine`, checking the schema version.
    pub fn open(engine: Arc<dyn KvEngine>) -> Result<Self, StoreError> {
        let store = Self {
            account: TypedTable::new(Arc::clone(&engine), Table::Accounts),
            block: TypedTable::new(Arc::clone(&engine), Table::Blocks),
            pending: TypedTable::new(Arc::clone(&engine), Table::Pending),
            confirmation_height: TypedTable::new(Arc::clone(&engine), Table::ConfirmationHeight),
            pruned: TypedTable::new(Arc::clone(&engine), Table::Pruned),
            final_vote: TypedTable::new(Arc::clone(&engine), Table::FinalVotes),
            online_weight: TypedTable::new(Arc::clone(&engine), Table::OnlineWeight),
            peer: TypedTable::new(Arc::clone(&engine), Table::Peers),
            version: VersionStore,
            engine,
        };
        {
            let mut txn = store.tx_begin_write();
            store.version.check(&mut txn)?;
            txn.commit()?;
        }
        Ok(store)
    }

    /// A store over a fresh volatile engine.
    pub fn new_memory() -> Self {
        // A fresh engine has no version entry, so the schema check cannot fail.
        match Self::open(Arc::new(MemoryEngine::new())) {
            Ok(store) => store,
            Err(e) => unreachable!("fresh memory store failed to open: {e}"),
        }
    }

    pub fn tx_begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(Arc::clone(&self.engine))
    }

    /// Blocks until no other write transaction is open.
    pub fn tx_begin_write(&self) -> WriteTransaction {
        WriteTransaction::new(&self.engine)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.engine.flush()
    }
}
