//! Recently seen peers and when they were last contacted (Unix ms).

use std::net::SocketAddrV6;

use crate::table::TypedTable;
use crate::transaction::WriteTransaction;

pub type PeerStore = TypedTable<SocketAddrV6, u64>;

impl TypedTable<SocketAddrV6, u64> {
    /// Drop peers last seen before `cutoff_ms`. Returns how many were removed.
    pub fn purge_older_than(&self, txn: &mut WriteTransaction, cutoff_ms: u64) -> usize {
        let stale: Vec<SocketAddrV6> = self
            .iter(txn)
            .filter(|(_, seen)| *seen < cutoff_ms)
            .map(|(endpoint, _)| endpoint)
            .collect();
        for endpoint in &stale {
            self.del(txn, endpoint);
        }
        stale.len()
    }
}
