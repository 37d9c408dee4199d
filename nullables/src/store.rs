//! Nullable store: a volatile engine that counts its transactions and can be
//! told to fail commits.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use lattice_store::{
    KvEngine, KvRead, KvWrite, MemoryEngine, Store, StoreError, Table, WriteOverlay,
};

pub struct NullStore {
    engine: MemoryEngine,
    write_txns: AtomicUsize,
    fail_commits: Arc<AtomicBool>,
}

impl NullStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            engine: MemoryEngine::new(),
            write_txns: AtomicUsize::new(0),
            fail_commits: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Typed tables over this engine.
    pub fn open(self: &Arc<Self>) -> Store {
        let engine: Arc<dyn KvEngine> = self.clone();
        match Store::open(engine) {
            Ok(store) => store,
            Err(e) => panic!("null store failed to open: {e}"),
        }
    }

    /// Write transactions begun so far, including the schema check.
    pub fn write_txns(&self) -> usize {
        self.write_txns.load(Ordering::SeqCst)
    }

    /// While set, every commit fails and discards the writer's changes.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl KvEngine for NullStore {
    fn begin_read(&self) -> Box<dyn KvRead + Send> {
        self.engine.begin_read()
    }

    fn begin_write(&self) -> Box<dyn KvWrite + Send> {
        self.write_txns.fetch_add(1, Ordering::SeqCst);
        Box::new(NullWrite {
            inner: self.engine.begin_write(),
            overlay: WriteOverlay::new(),
            fail: Arc::clone(&self.fail_commits),
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Holds changes back from the memory engine until a commit is allowed.
struct NullWrite {
    inner: Box<dyn KvWrite + Send>,
    overlay: WriteOverlay,
    fail: Arc<AtomicBool>,
}

impl KvRead for NullWrite {
    fn get(&self, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        self.overlay.get(self.inner.as_read(), table, key)
    }

    fn range(&self, table: Table, start: Bound<&[u8]>, max: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.overlay.range(self.inner.as_read(), table, start, max)
    }

    fn count(&self, table: Table) -> u64 {
        self.overlay.count(self.inner.as_read(), table)
    }
}

impl KvWrite for NullWrite {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) {
        self.overlay.put(table, key, value);
    }

    fn del(&mut self, table: Table, key: &[u8]) {
        self.overlay.del(table, key);
    }

    fn clear(&mut self, table: Table) {
        self.overlay.clear(table);
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.overlay.is_empty() {
            return self.inner.commit();
        }
        let changes = self.overlay.take();
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit refused by null store".into()));
        }
        for change in changes {
            if change.cleared {
                self.inner.clear(change.table);
            }
            for (key, value) in &change.changes {
                match value {
                    Some(value) => self.inner.put(change.table, key, value),
                    None => self.inner.del(change.table, key),
                }
            }
        }
        self.inner.commit()
    }

    fn renew(&mut self) -> Result<(), StoreError> {
        self.commit()?;
        self.inner.renew()
    }

    fn as_read(&self) -> &dyn KvRead {
        self
    }
}

/// A fresh in-memory store.
pub fn null_store() -> Arc<Store> {
    Arc::new(NullStore::new().open())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Account, AccountInfo};

    #[test]
    fn counts_write_transactions() {
        let null = NullStore::new();
        let store = null.open();
        assert_eq!(null.write_txns(), 1);
        {
            let mut txn = store.tx_begin_write();
            store
                .account
                .put(&mut txn, &Account::new([1; 32]), &AccountInfo::default());
        }
        assert_eq!(null.write_txns(), 2);
        assert_eq!(store.account.count(&store.tx_begin_read()), 1);
    }

    #[test]
    fn failed_commit_discards_changes() {
        let null = NullStore::new();
        let store = null.open();
        null.fail_commits(true);
        {
            let mut txn = store.tx_begin_write();
            store
                .account
                .put(&mut txn, &Account::new([1; 32]), &AccountInfo::default());
            assert!(txn.commit().is_err());
            assert_eq!(store.account.count(&txn), 0);
        }
        null.fail_commits(false);
        assert_eq!(store.account.count(&store.tx_begin_read()), 0);
    }
}
