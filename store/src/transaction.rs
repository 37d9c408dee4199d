//! Scoped read and write transactions.

use std::sync::Arc;

use crate::engine::{KvEngine, KvRead, KvWrite};
use crate::StoreError;

/// Anything tables can read through.
pub trait Transaction {
    fn reader(&self) -> &dyn KvRead;
}

pub struct ReadTransaction {
    engine: Arc<dyn KvEngine>,
    txn: Box<dyn KvRead + Send>,
}

impl ReadTransaction {
    pub(crate) fn new(engine: Arc<dyn KvEngine>) -> Self {
        let txn = engine.begin_read();
        Self { engine, txn }
    }

    /// Start over with a fresh view of committed state.
    pub fn refresh(&mut self) {
        self.txn = self.engine.begin_read();
    }
}

impl Transaction for ReadTransaction {
    fn reader(&self) -> &dyn KvRead {
        &*self.txn
    }
}

/// The single store writer. Commits when dropped.
pub struct WriteTransaction {
    txn: Box<dyn KvWrite + Send>,
}

impl WriteTransaction {
    pub(crate) fn new(engine: &Arc<dyn KvEngine>) -> Self {
        Self {
            txn: engine.begin_write(),
        }
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.txn.commit()
    }

    /// Commit and give queued writers a turn before continuing.
    pub fn refresh(&mut self) -> Result<(), StoreError> {
        self.txn.renew()
    }

    pub(crate) fn writer(&mut self) -> &mut dyn KvWrite {
        &mut *self.txn
    }
}

impl Transaction for WriteTransaction {
    fn reader(&self) -> &dyn KvRead {
        self.txn.as_read()
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if let Err(e) = self.txn.commit() {
            tracing::error!(error = %e, "write transaction commit failed on drop");
        }
    }
}
