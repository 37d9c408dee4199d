//! Volatile engine for tests and tooling.
//!
//! Committed state is an immutable set of ordered maps behind an `Arc`. A
//! reader pins the set that was current when it began; a commit builds the
//! next set copy-on-write and swaps it in. Nothing survives the process.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::engine::{KvEngine, KvRead, KvWrite, Table};
use crate::overlay::{WriteOverlay, WriterGate};
use crate::StoreError;

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;
type Tables = Arc<Vec<Arc<TableMap>>>;

struct Shared {
    current: RwLock<Tables>,
    writer: WriterGate,
}

impl Shared {
    fn snapshot(&self) -> Tables {
        Arc::clone(&self.current.read().unwrap())
    }
}

pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        let empty = (0..Table::COUNT).map(|_| Arc::new(TableMap::new())).collect();
        Self {
            shared: Arc::new(Shared {
                current: RwLock::new(Arc::new(empty)),
                writer: WriterGate::new(),
            }),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryEngine {
    fn begin_read(&self) -> Box<dyn KvRead + Send> {
        Box::new(MemoryRead {
            tables: self.shared.snapshot(),
        })
    }

    fn begin_write(&self) -> Box<dyn KvWrite + Send> {
        self.shared.writer.acquire();
        Box::new(MemoryWrite {
            base: MemoryRead {
                tables: self.shared.snapshot(),
            },
            shared: Arc::clone(&self.shared),
            overlay: WriteOverlay::new(),
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryRead {
    tables: Tables,
}

impl KvRead for MemoryRead {
    fn get(&self, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        self.tables[table.index()].get(key).cloned()
    }

    fn range(&self, table: Table, start: Bound<&[u8]>, max: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.tables[table.index()]
            .range::<[u8], _>((start, Bound::Unbounded))
            .take(max)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn count(&self, table: Table) -> u64 {
        self.tables[table.index()].len() as u64
    }
}

struct MemoryWrite {
    shared: Arc<Shared>,
    /// Committed state as of the last commit by this writer.
    base: MemoryRead,
    overlay: WriteOverlay,
}

impl KvRead for MemoryWrite {
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

impl KvWrite for MemoryWrite {
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
            return Ok(());
        }
        let mut next: Vec<Arc<TableMap>> = self.base.tables.iter().cloned().collect();
        for change in self.overlay.take() {
            let map = Arc::make_mut(&mut next[change.table.index()]);
            if change.cleared {
                map.clear();
            }
            for (key, value) in change.changes {
                match value {
                    Some(value) => {
                        map.insert(key, value);
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
        }
        let next = Arc::new(next);
        *self.shared.current.write().unwrap() = Arc::clone(&next);
        self.base.tables = next;
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

impl Drop for MemoryWrite {
    fn drop(&mut self) {
        self.shared.writer.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_writes_are_private() {
        let engine = MemoryEngine::new();
        let mut writer = engine.begin_write();
        writer.put(Table::Accounts, b"a", b"1");
        assert_eq!(writer.get(Table::Accounts, b"a"), Some(b"1".to_vec()));
        assert_eq!(engine.begin_read().get(Table::Accounts, b"a"), None);
        writer.commit().unwrap();
        assert_eq!(
            engine.begin_read().get(Table::Accounts, b"a"),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn reader_keeps_its_snapshot_across_commits() {
        let engine = MemoryEngine::new();
        let reader = engine.begin_read();
        let mut writer = engine.begin_write();
        writer.put(Table::ConfirmationHeight, b"acct", b"5");
        writer.commit().unwrap();
        assert_eq!(reader.get(Table::ConfirmationHeight, b"acct"), None);
        assert_eq!(reader.count(Table::ConfirmationHeight), 0);
        assert_eq!(engine.begin_read().count(Table::ConfirmationHeight), 1);
    }

    #[test]
    fn range_merges_overlay_and_base() {
        let engine = MemoryEngine::new();
        {
            let mut writer = engine.begin_write();
            for k in [b"a".as_slice(), b"c", b"e"] {
                writer.put(Table::Blocks, k, b"base");
            }
            writer.commit().unwrap();
        }
        let mut writer = engine.begin_write();
        writer.put(Table::Blocks, b"b", b"new");
        writer.del(Table::Blocks, b"c");
        writer.put(Table::Blocks, b"e", b"changed");
        let entries = writer.range(Table::Blocks, Bound::Unbounded, 10);
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"e".as_slice()]);
        assert_eq!(entries[2].1, b"changed".to_vec());
        assert_eq!(writer.count(Table::Blocks), 3);
    }

    #[test]
    fn deletes_do_not_shorten_a_range_page() {
        let engine = MemoryEngine::new();
        let mut writer = engine.begin_write();
        for k in 0u8..6 {
            writer.put(Table::Pending, &[k], b"v");
        }
        writer.commit().unwrap();
        writer.del(Table::Pending, &[0]);
        writer.del(Table::Pending, &[1]);
        let keys: Vec<_> = writer
            .range(Table::Pending, Bound::Unbounded, 2)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![vec![2], vec![3]]);
    }

    #[test]
    fn clear_hides_committed_entries() {
        let engine = MemoryEngine::new();
        let mut writer = engine.begin_write();
        writer.put(Table::Peers, b"x", b"1");
        writer.commit().unwrap();
        writer.clear(Table::Peers);
        assert_eq!(writer.count(Table::Peers), 0);
        assert!(writer.get(Table::Peers, b"x").is_none());
        writer.commit().unwrap();
        assert_eq!(engine.begin_read().count(Table::Peers), 0);
    }

    #[test]
    fn dropping_the_writer_lets_the_next_one_in() {
        let engine = MemoryEngine::new();
        drop(engine.begin_write());
        let mut second = engine.begin_write();
        second.put(Table::Version, b"v", b"1");
        second.renew().unwrap();
        assert_eq!(engine.begin_read().count(Table::Version), 1);
    }
}
