//! Pulling one account chain from one peer.

use std::time::Duration;

use lattice_messages::{BulkPull, Message};
use lattice_types::{BlockHash, HashOrAccount};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use super::attempt::BootstrapAttempt;
use super::client::{BootstrapClient, BootstrapConnections};

/// One chain segment to fetch: from `head` (or the account's head) back to
/// `end`, exclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullInfo {
    pub account_or_head: HashOrAccount,
    /// Resume point; moves back as blocks arrive.
    pub head: BlockHash,
    pub head_original: BlockHash,
    pub end: BlockHash,
    /// Zero means no limit.
    pub count: u32,
    pub attempts: u32,
    pub processed: u64,
    pub retry_limit: u32,
    pub bootstrap_id: u64,
}

impl PullInfo {
    pub fn new(
        account_or_head: HashOrAccount,
        head: BlockHash,
        end: BlockHash,
        count: u32,
        bootstrap_id: u64,
        retry_limit: u32,
    ) -> Self {
        Self {
            account_or_head,
            head,
            head_original: head,
            end,
            count,
            attempts: 0,
            processed: 0,
            retry_limit,
            bootstrap_id,
        }
    }

    fn is_resumed(&self) -> bool {
        self.head != self.head_original && !self.head.is_zero()
    }

    pub fn request(&self) -> BulkPull {
        let start = if self.is_resumed() {
            self.head.into()
        } else {
            self.account_or_head
        };
        let count = if self.count == 0 {
            0
        } else {
            self.count.saturating_sub(self.processed as u32).max(1)
        };
        BulkPull {
            start,
            end: self.end,
            count,
            ascending: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PullOutcome {
    Complete,
    /// The attempt wants no more blocks from this pull.
    Abandoned,
    Failed,
}

/// Send the request for `pull` and feed the streamed reply to `attempt`.
pub(crate) fn pull_blocks(
    client: &BootstrapClient,
    pull: &mut PullInfo,
    attempt: &dyn BootstrapAttempt,
    timeout: Duration,
    stats: &Stats,
) -> PullOutcome {
    if !client.send(&Message::BulkPull(pull.request())) {
        return PullOutcome::Failed;
    }
    stats.inc_dir(StatType::Bootstrap, DetailType::BulkPull, Direction::Out);
    let mut expected = if pull.is_resumed() {
        pull.head
    } else {
        BlockHash::ZERO
    };
    loop {
        if attempt.stopped() {
            return PullOutcome::Abandoned;
        }
        match client.receive(timeout) {
            Some(Message::BulkPullResp(resp)) => {
                if resp.is_end() {
                    return PullOutcome::Complete;
                }
                for block in resp.blocks {
                    let hash = block.hash();
                    if !expected.is_zero() && hash != expected {
                        tracing::debug!(%hash, %expected, peer = %client.endpoint(), "pulled block does not chain");
                        return PullOutcome::Failed;
                    }
                    expected = block.previous();
                    pull.head = expected;
                    pull.processed += 1;
                    if attempt.process_block(block, pull) {
                        return PullOutcome::Abandoned;
                    }
                }
            }
            Some(other) => {
                tracing::trace!(message = ?other.message_type(), "unexpected message during pull");
            }
            None => {
                tracing::debug!(peer = %client.endpoint(), account_or_head = ?pull.account_or_head, "pull timed out");
                return PullOutcome::Failed;
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PullRound {
    pub completed: usize,
    pub connection_failed: bool,
}

/// Drain the attempt's queued pulls with as many parallel clients as the
/// queue justifies.
pub(crate) fn execute_pulls(
    attempt: &dyn BootstrapAttempt,
    connections: &BootstrapConnections,
    timeout: Duration,
    stats: &Stats,
) -> PullRound {
    let pending = connections.pulls_len(attempt.id());
    if pending == 0 {
        return PullRound::default();
    }
    let workers = connections.target_connections(pending).min(pending);
    let rounds: Vec<PullRound> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .filter_map(|_| {
                std::thread::Builder::new()
                    .name("bootstrap pull".to_string())
                    .spawn_scoped(scope, || pull_worker(attempt, connections, timeout, stats))
                    .map_err(|e| tracing::warn!(error = %e, "failed to spawn pull worker"))
                    .ok()
            })
            .collect();
        handles.into_iter().filter_map(|h| h.join().ok()).collect()
    });
    PullRound {
        completed: rounds.iter().map(|r| r.completed).sum(),
        connection_failed: rounds.iter().any(|r| r.connection_failed),
    }
}

fn pull_worker(
    attempt: &dyn BootstrapAttempt,
    connections: &BootstrapConnections,
    timeout: Duration,
    stats: &Stats,
) -> PullRound {
    let mut round = PullRound::default();
    while !attempt.stopped() {
        let Some(mut pull) = connections.next_pull(attempt.id()) else {
            break;
        };
        let Some(client) = connections.connection() else {
            connections.return_pull(pull);
            round.connection_failed = true;
            break;
        };
        match pull_blocks(&client, &mut pull, attempt, timeout, stats) {
            PullOutcome::Complete => {
                connections.pool_connection(client);
                connections.pull_done(&pull);
                attempt.pull_finished(&pull);
                round.completed += 1;
            }
            PullOutcome::Abandoned => connections.discard(&client),
            PullOutcome::Failed => {
                connections.discard(&client);
                connections.requeue_pull(pull);
            }
        }
    }
    round
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Account;

    #[test]
    fn fresh_pull_starts_at_its_target() {
        let account = Account::new([1; 32]);
        let pull = PullInfo::new(account.into(), BlockHash::new([2; 32]), BlockHash::ZERO, 0, 0, 4);
        assert_eq!(pull.request().start, HashOrAccount::from(account));
        assert_eq!(pull.request().count, 0);
    }

    #[test]
    fn resumed_pull_starts_at_its_head() {
        let mut pull = PullInfo::new(
            Account::new([1; 32]).into(),
            BlockHash::new([2; 32]),
            BlockHash::ZERO,
            10,
            0,
            4,
        );
        pull.head = BlockHash::new([3; 32]);
        pull.processed = 4;
        let request = pull.request();
        assert_eq!(request.start, HashOrAccount::from(BlockHash::new([3; 32])));
        assert_eq!(request.count, 6);
    }
}
