//! Ordered, typed iteration over one table.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use rayon::prelude::*;
use serde::de::DeserializeOwned;

use crate::codec::{decode_value, DbKey};
use crate::engine::{KvEngine, KvRead, Table};

const CHUNK: usize = 512;

/// Walks a table in key order, fetching entries from the engine in chunks.
pub struct StoreIterator<'txn, K, V> {
    reader: &'txn dyn KvRead,
    table: Table,
    next_start: Bound<Vec<u8>>,
    end: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
    _marker: PhantomData<(K, V)>,
}

impl<'txn, K: DbKey, V: DeserializeOwned> StoreIterator<'txn, K, V> {
    pub(crate) fn new(
        reader: &'txn dyn KvRead,
        table: Table,
        start: Bound<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> Self {
        Self {
            reader,
            table,
            next_start: start,
            end,
            buffer: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        }
    }

    fn fill(&mut self) {
        let start = match &self.next_start {
            Bound::Included(k) => Bound::Included(k.as_slice()),
            Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let chunk = self.reader.range(self.table, start, CHUNK);
        if chunk.len() < CHUNK {
            self.exhausted = true;
        }
        if let Some((last, _)) = chunk.last() {
            self.next_start = Bound::Excluded(last.clone());
        }
        self.buffer.extend(chunk);
    }
}

impl<K: DbKey, V: DeserializeOwned> Iterator for StoreIterator<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.buffer.is_empty() {
                if self.exhausted {
                    return None;
                }
                self.fill();
                continue;
            }
            let (key, value) = self.buffer.pop_front()?;
            if let Some(end) = &self.end {
                if key >= *end {
                    self.buffer.clear();
                    self.exhausted = true;
                    return None;
                }
            }
            let Some(k) = K::from_key(&key) else {
                tracing::error!(table = self.table.as_str(), "undecodable key");
                continue;
            };
            if let Some(v) = decode_value(self.table, &value) {
                return Some((k, v));
            }
        }
    }
}

/// Split the key space by leading byte and hand each slice to `action` on a
/// rayon worker, each with its own read transaction.
pub(crate) fn for_each_par<K, V, F>(engine: &Arc<dyn KvEngine>, table: Table, action: F)
where
    K: DbKey,
    V: DeserializeOwned,
    F: Fn(StoreIterator<'_, K, V>) + Send + Sync,
{
    let partitions = rayon::current_num_threads().clamp(1, 256);
    (0..partitions).into_par_iter().for_each(|i| {
        let first = (i * 256 / partitions) as u8;
        let next = (i + 1) * 256 / partitions;
        let end = (next < 256).then(|| vec![next as u8]);
        let reader = engine.begin_read();
        let iter = StoreIterator::new(&*reader, table, Bound::Included(vec![first]), end);
        action(iter);
    });
}
