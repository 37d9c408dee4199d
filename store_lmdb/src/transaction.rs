//! Read and write transactions over the LMDB environment.

use std::ops::Bound;
use std::sync::Arc;

use heed::RoTxn;
use tracing::error;

use lattice_store::{KvRead, KvWrite, StoreError, Table, WriteOverlay};

use crate::environment::Shared;
use crate::LmdbError;

/// A pinned LMDB snapshot.
pub struct LmdbRead {
    shared: Arc<Shared>,
    txn: RoTxn<'static>,
}

impl LmdbRead {
    pub(crate) fn begin(shared: &Arc<Shared>) -> Self {
        // Fails only when reader slots run out or the environment is broken.
        let txn = shared
            .env
            .clone()
            .static_read_txn()
            .unwrap_or_else(|e| panic!("cannot begin LMDB read transaction: {e}"));
        Self {
            shared: Arc::clone(shared),
            txn,
        }
    }
}

impl KvRead for LmdbRead {
    fn get(&self, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        match self.shared.db(table).get(&self.txn, key) {
            Ok(value) => value.map(<[u8]>::to_vec),
            Err(e) => {
                error!(table = table.as_str(), error = %e, "LMDB get failed");
                None
            }
        }
    }

    fn range(&self, table: Table, start: Bound<&[u8]>, max: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (start, Bound::Unbounded);
        let iter = match self.shared.db(table).range(&self.txn, &bounds) {
            Ok(iter) => iter,
            Err(e) => {
                error!(table = table.as_str(), error = %e, "LMDB range failed");
                return Vec::new();
            }
        };
        let mut entries = Vec::new();
        for entry in iter.take(max) {
            match entry {
                Ok((key, value)) => entries.push((key.to_vec(), value.to_vec())),
                Err(e) => {
                    error!(table = table.as_str(), error = %e, "LMDB cursor failed");
                    break;
                }
            }
        }
        entries
    }

    fn count(&self, table: Table) -> u64 {
        self.shared.db(table).len(&self.txn).unwrap_or_else(|e| {
            error!(table = table.as_str(), error = %e, "LMDB count failed");
            0
        })
    }
}

/// The single writer. Changes are buffered and written to LMDB in one write
/// transaction per commit.
pub struct LmdbWrite {
    pub(crate) shared: Arc<Shared>,
    /// Snapshot as of this writer's last commit.
    pub(crate) base: LmdbRead,
    pub(crate) overlay: WriteOverlay,
}

impl LmdbWrite {
    fn apply(&mut self) -> Result<(), LmdbError> {
        let mut wtxn = self.shared.env.write_txn()?;
        for change in self.overlay.take() {
            let db = self.shared.db(change.table);
            if change.cleared {
                db.clear(&mut wtxn)?;
            }
            for (key, value) in &change.changes {
                match value {
                    Some(value) => db.put(&mut wtxn, key, value)?,
                    None => {
                        db.delete(&mut wtxn, key)?;
                    }
                }
            }
        }
        wtxn.commit()?;
        Ok(())
    }
}

impl KvRead for LmdbWrite {
    fn get(&self, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        self.overlay.get(&self.base, table, key)
    }

    fn range(&self, table: Table, start: Bound<&[u8]>, max: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.overlay.range(&self.base, table, start, max)
    }

    fn count(&self, table: Table) -> u64 {
        self.overlay.count(&self.base, table)
    }
}

impl KvWrite for LmdbWrite {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) {
        self.overlay.put(table, key, value);
    }

    fn del(&mut self, table: Table, key: &[u8]) {
        self.overlay.del(table, key);
    }

    fn clear(&mut self, table: Table) {
        self.overlay.clear(table);
    }

    /// On failure the buffered changes are dropped and the writer continues
    /// from the last committed state.
    fn commit(&mut self) -> Result<(), StoreError> {
        if self.overlay.is_empty() {
            return Ok(());
        }
        let result = self.apply();
        self.base = LmdbRead::begin(&self.shared);
        result?;
        Ok(())
    }

    fn renew(&mut self) -> Result<(), StoreError> {
        self.commit()?;
        self.shared.writer.release();
        self.shared.writer.acquire();
        Ok(())
    }

    fn as_read(&self) -> &dyn KvRead {
        self
    }
}

impl Drop for LmdbWrite {
    fn drop(&mut self) {
        self.shared.writer.release();
    }
}
