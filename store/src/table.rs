//! Typed view of one engine table.

use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{decode_value, encode_value, DbKey};
use crate::engine::{KvEngine, Table};
use crate::iterator::{for_each_par, StoreIterator};
use crate::transaction::{Transaction, WriteTransaction};

pub struct TypedTable<K, V> {
    pub(crate) engine: Arc<dyn KvEngine>,
    pub(crate) table: Table,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> TypedTable<K, V>
where
    K: DbKey,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(engine: Arc<dyn KvEngine>, table: Table) -> Self {
        Self {
            engine,
            table,
            _marker: PhantomData,
        }
    }

    pub fn put(&self, txn: &mut WriteTransaction, key: &K, value: &V) {
        txn.writer()
            .put(self.table, &key.to_key(), &encode_value(value));
    }

    pub fn get(&self, txn: &dyn Transaction, key: &K) -> Option<V> {
        let bytes = txn.reader().get(self.table, &key.to_key())?;
        decode_value(self.table, &bytes)
    }

    pub fn del(&self, txn: &mut WriteTransaction, key: &K) {
        txn.writer().del(self.table, &key.to_key());
    }

    pub fn exists(&self, txn: &dyn Transaction, key: &K) -> bool {
        txn.reader().get(self.table, &key.to_key()).is_some()
    }

    pub fn count(&self, txn: &dyn Transaction) -> u64 {
        txn.reader().count(self.table)
    }

    pub fn clear(&self, txn: &mut WriteTransaction) {
        txn.writer().clear(self.table);
    }

    pub fn iter<'a>(&self, txn: &'a dyn Transaction) -> StoreIterator<'a, K, V> {
        StoreIterator::new(txn.reader(), self.table, Bound::Unbounded, None)
    }

    /// Entries with keys at or after `start`.
    pub fn iter_from<'a>(&self, txn: &'a dyn Transaction, start: &K) -> StoreIterator<'a, K, V> {
        StoreIterator::new(
            txn.reader(),
            self.table,
            Bound::Included(start.to_key()),
            None,
        )
    }

    /// Entries with `start <= key < end`.
    pub fn iter_range<'a>(
        &self,
        txn: &'a dyn Transaction,
        start: &K,
        end: Option<&K>,
    ) -> StoreIterator<'a, K, V> {
        StoreIterator::new(
            txn.reader(),
            self.table,
            Bound::Included(start.to_key()),
            end.map(DbKey::to_key),
        )
    }

    pub fn for_each_par<F>(&self, action: F)
    where
        F: Fn(StoreIterator<'_, K, V>) + Send + Sync,
    {
        for_each_par(&self.engine, self.table, action);
    }
}
