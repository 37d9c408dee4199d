//! Uncommitted changes of a writer, layered over committed state.
//!
//! Engines keep one writer at a time, so the committed state under an
//! overlay only changes when the overlay itself is committed.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::{Condvar, Mutex};

use crate::engine::{KvRead, Table};

/// Admits one writer at a time. Engines acquire it in `begin_write` and
/// release it when the writer drops.
#[derive(Default)]
pub struct WriterGate {
    active: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) {
        let mut active = self.active.lock().unwrap();
        while *active {
            active = self.released.wait(active).unwrap();
        }
        *active = true;
    }

    pub fn release(&self) {
        *self.active.lock().unwrap() = false;
        self.released.notify_one();
    }
}

/// Pending change of one key: `Some` is a put, `None` a delete.
pub type Changes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub struct WriteOverlay {
    changes: Vec<Changes>,
    cleared: [bool; Table::COUNT],
}

/// Everything a commit has to apply to one table.
pub struct TableChanges {
    pub table: Table,
    pub cleared: bool,
    pub changes: Changes,
}

impl WriteOverlay {
    pub fn new() -> Self {
        Self {
            changes: vec![Changes::new(); Table::COUNT],
            cleared: [false; Table::COUNT],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(BTreeMap::is_empty) && !self.cleared.iter().any(|c| *c)
    }

    pub fn put(&mut self, table: Table, key: &[u8], value: &[u8]) {
        self.changes[table.index()].insert(key.to_vec(), Some(value.to_vec()));
    }

    pub fn del(&mut self, table: Table, key: &[u8]) {
        self.changes[table.index()].insert(key.to_vec(), None);
    }

    pub fn clear(&mut self, table: Table) {
        let i = table.index();
        self.changes[i].clear();
        self.cleared[i] = true;
    }

    /// Hand over every change, leaving the overlay empty.
    pub fn take(&mut self) -> Vec<TableChanges> {
        Table::ALL
            .iter()
            .filter_map(|&table| {
                let i = table.index();
                let cleared = std::mem::take(&mut self.cleared[i]);
                let changes = std::mem::take(&mut self.changes[i]);
                (cleared || !changes.is_empty()).then_some(TableChanges {
                    table,
                    cleared,
                    changes,
                })
            })
            .collect()
    }

    pub fn get(&self, base: &dyn KvRead, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        let i = table.index();
        if let Some(change) = self.changes[i].get(key) {
            return change.clone();
        }
        if self.cleared[i] {
            return None;
        }
        base.get(table, key)
    }

    pub fn range(
        &self,
        base: &dyn KvRead,
        table: Table,
        start: Bound<&[u8]>,
        max: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let i = table.index();
        let mut changes = self.changes[i]
            .range::<[u8], _>((start, Bound::Unbounded))
            .peekable();
        let mut out = Vec::new();
        let mut base_start: Bound<Vec<u8>> = match start {
            Bound::Included(k) => Bound::Included(k.to_vec()),
            Bound::Excluded(k) => Bound::Excluded(k.to_vec()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let mut base_chunk = VecDeque::new();
        let mut base_done = self.cleared[i];

        while out.len() < max {
            if base_chunk.is_empty() && !base_done {
                let bound = match &base_start {
                    Bound::Included(k) => Bound::Included(k.as_slice()),
                    Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
                    Bound::Unbounded => Bound::Unbounded,
                };
                // Deletes in the overlay can hide base entries, so fetch
                // base entries in chunks until `max` survive.
                let chunk = base.range(table, bound, max);
                base_done = chunk.len() < max;
                if let Some((last, _)) = chunk.last() {
                    base_start = Bound::Excluded(last.clone());
                }
                base_chunk.extend(chunk);
            }
            let order = match (base_chunk.front(), changes.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((bk, _)), Some((ck, _))) => bk.as_slice().cmp(ck.as_slice()),
            };
            if order == Ordering::Less {
                if let Some(entry) = base_chunk.pop_front() {
                    out.push(entry);
                }
                continue;
            }
            if order == Ordering::Equal {
                base_chunk.pop_front();
            }
            if let Some((k, Some(v))) = changes.next() {
                out.push((k.clone(), v.clone()));
            }
        }
        out
    }

    pub fn count(&self, base: &dyn KvRead, table: Table) -> u64 {
        let i = table.index();
        if self.cleared[i] {
            return self.changes[i].values().filter(|c| c.is_some()).count() as u64;
        }
        let mut count = base.count(table) as i64;
        for (key, change) in &self.changes[i] {
            match (base.get(table, key).is_some(), change.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        count.max(0) as u64
    }
}

impl Default for WriteOverlay {
    fn default() -> Self {
        Self::new()
    }
}
