//! Byte-level key/value engine underneath the typed tables.
//!
//! An engine hands out read views and a single writer at a time. Keys within
//! a table are ordered lexicographically; every range query returns entries
//! in that order.

use std::ops::Bound;

use crate::StoreError;

/// The tables a node persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Accounts,
    Blocks,
    Pending,
    ConfirmationHeight,
    Pruned,
    FinalVotes,
    OnlineWeight,
    Peers,
    Version,
}

impl Table {
    pub const COUNT: usize = 9;

    pub const ALL: [Table; Table::COUNT] = [
        Table::Accounts,
        Table::Blocks,
        Table::Pending,
        Table::ConfirmationHeight,
        Table::Pruned,
        Table::FinalVotes,
        Table::OnlineWeight,
        Table::Peers,
        Table::Version,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Accounts => "accounts",
            Table::Blocks => "blocks",
            Table::Pending => "pending",
            Table::ConfirmationHeight => "confirmation_height",
            Table::Pruned => "pruned",
            Table::FinalVotes => "final_votes",
            Table::OnlineWeight => "online_weight",
            Table::Peers => "peers",
            Table::Version => "version",
        }
    }
}

/// A consistent read view.
pub trait KvRead {
    fn get(&self, table: Table, key: &[u8]) -> Option<Vec<u8>>;

    /// At most `max` entries whose key is after `start`, in key order.
    fn range(&self, table: Table, start: Bound<&[u8]>, max: usize) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn count(&self, table: Table) -> u64;
}

/// The single writer. Reads through a writer see its own uncommitted changes.
pub trait KvWrite: KvRead {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]);

    fn del(&mut self, table: Table, key: &[u8]);

    fn clear(&mut self, table: Table);

    /// Publish every change made so far. The writer stays usable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Commit, let waiting writers run, then reacquire the writer role.
    fn renew(&mut self) -> Result<(), StoreError>;

    fn as_read(&self) -> &dyn KvRead;
}

pub trait KvEngine: Send + Sync {
    fn begin_read(&self) -> Box<dyn KvRead + Send>;

    /// Blocks until no other writer is active.
    fn begin_write(&self) -> Box<dyn KvWrite + Send>;

    /// Make committed state durable, where the engine supports it.
    fn flush(&self) -> Result<(), StoreError>;
}
