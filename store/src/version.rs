//! Schema version of the persisted tables.

use crate::codec::{decode_value, encode_value};
use crate::engine::Table;
use crate::transaction::{Transaction, WriteTransaction};
use crate::StoreError;

/// The schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const VERSION_KEY: &[u8] = b"version";

pub struct VersionStore;

impl VersionStore {
    pub fn get(&self, txn: &dyn Transaction) -> Option<u32> {
        let bytes = txn.reader().get(Table::Version, VERSION_KEY)?;
        decode_value(Table::Version, &bytes)
    }

    pub fn put(&self, txn: &mut WriteTransaction, version: u32) {
        txn.writer()
            .put(Table::Version, VERSION_KEY, &encode_value(&version));
    }

    /// Stamp a fresh database, accept the current schema, refuse newer ones.
    pub fn check(&self, txn: &mut WriteTransaction) -> Result<(), StoreError> {
        match self.get(txn) {
            None => {
                self.put(txn, CURRENT_SCHEMA_VERSION);
                tracing::info!(version = CURRENT_SCHEMA_VERSION, "initialized database schema");
                Ok(())
            }
            Some(found) if found > CURRENT_SCHEMA_VERSION => Err(StoreError::SchemaTooNew {
                found,
                supported: CURRENT_SCHEMA_VERSION,
            }),
            Some(found) => {
                tracing::debug!(version = found, "database schema is up to date");
                Ok(())
            }
        }
    }
}
