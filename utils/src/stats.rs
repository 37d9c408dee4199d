//! Statistics counters.
//!
//! Every component reports outcomes as `(type, detail, direction)` counters.
//! Dropped work, rejected blocks and replayed votes are visible here instead
//! of being propagated as errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

macro_rules! stat_enum {
    ($name:ident { $($variant:ident => $text:literal),* $(,)? }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),*
                }
            }
        }
    };
}

stat_enum!(StatType {
    Ledger => "ledger",
    Rollback => "rollback",
    BlockProcessor => "block_processor",
    ConfirmationHeight => "confirmation_height",
    ActiveElections => "active_elections",
    Election => "election",
    ElectionScheduler => "election_scheduler",
    Vote => "vote",
    VoteProcessor => "vote_processor",
    VoteGenerator => "vote_generator",
    VoteCache => "vote_cache",
    RequestAggregator => "request_aggregator",
    ConfirmationSolicitor => "confirmation_solicitor",
    RepCrawler => "rep_crawler",
    OnlineReps => "online_reps",
    RepTiers => "rep_tiers",
    Unchecked => "unchecked",
    GapCache => "gap_cache",
    Bootstrap => "bootstrap",
    BootstrapAscending => "bootstrap_ascending",
    BootstrapServer => "bootstrap_server",
    Tcp => "tcp",
    TcpListener => "tcp_listener",
    Message => "message",
    Filter => "filter",
    PeerExclusion => "peer_exclusion",
    Handshake => "handshake",
    Telemetry => "telemetry",
    Keepalive => "keepalive",
});

stat_enum!(DetailType {
    All => "all",
    // ledger results
    Progress => "progress",
    GapPrevious => "gap_previous",
    GapSource => "gap_source",
    GapEpochOpenPending => "gap_epoch_open_pending",
    Old => "old",
    Fork => "fork",
    BadSignature => "bad_signature",
    NegativeSpend => "negative_spend",
    Unreceivable => "unreceivable",
    OpenedBurnAccount => "opened_burn_account",
    BalanceMismatch => "balance_mismatch",
    RepresentativeMismatch => "representative_mismatch",
    BlockPosition => "block_position",
    InsufficientWork => "insufficient_work",
    WriteFailed => "write_failed",
    RollbackFailed => "rollback_failed",
    // block subtypes
    Send => "send",
    Receive => "receive",
    Open => "open",
    Change => "change",
    Epoch => "epoch",
    // queues
    Overfill => "overfill",
    Process => "process",
    Processed => "processed",
    Forced => "forced",
    Insert => "insert",
    Erase => "erase",
    Trim => "trim",
    Put => "put",
    Satisfied => "satisfied",
    Evicted => "evicted",
    Expired => "expired",
    // block sources
    Live => "live",
    LiveOriginator => "live_originator",
    Bootstrap => "bootstrap",
    BootstrapLegacy => "bootstrap_legacy",
    Unchecked => "unchecked",
    Local => "local",
    Election => "election",
    // cementing
    BlocksConfirmed => "blocks_confirmed",
    BlocksConfirmedUnbounded => "blocks_confirmed_unbounded",
    BlocksConfirmedBounded => "blocks_confirmed_bounded",
    AlreadyCemented => "already_cemented",
    // elections
    ElectionStart => "election_start",
    ElectionConfirmed => "election_confirmed",
    ElectionExpiredConfirmed => "election_expired_confirmed",
    ElectionExpiredUnconfirmed => "election_expired_unconfirmed",
    ElectionCancelled => "election_cancelled",
    Priority => "priority",
    Hinted => "hinted",
    Optimistic => "optimistic",
    Manual => "manual",
    Activated => "activated",
    ActivateSuccessors => "activate_successors",
    MissingBlock => "missing_block",
    // votes
    Vote => "vote",
    Replay => "replay",
    Indeterminate => "indeterminate",
    Ignored => "ignored",
    Invalid => "invalid",
    VoteOverflow => "vote_overflow",
    GeneratorBroadcasts => "generator_broadcasts",
    GeneratorReplies => "generator_replies",
    GeneratorSpacing => "generator_spacing",
    FinalVotes => "final_votes",
    // request aggregator
    AggregatorAccepted => "aggregator_accepted",
    AggregatorDropped => "aggregator_dropped",
    RequestsCachedVotes => "requests_cached_votes",
    RequestsGeneratedVotes => "requests_generated_votes",
    RequestsUnknown => "requests_unknown",
    // representatives
    TierNone => "none",
    Tier1 => "tier_1",
    Tier2 => "tier_2",
    Tier3 => "tier_3",
    ChannelChanged => "channel_changed",
    ChannelDead => "channel_dead",
    CrawlQuery => "crawl_query",
    QueryTimeout => "query_timeout",
    ResponseUnsolicited => "response_unsolicited",
    RepResponse => "rep_response",
    // solicitor
    ConfirmReqSent => "confirm_req_sent",
    BroadcastBlock => "broadcast_block",
    // bootstrap
    Initiate => "initiate",
    InitiateLegacy => "initiate_legacy",
    InitiateLazy => "initiate_lazy",
    FrontierReq => "frontier_req",
    FrontierRetry => "frontier_retry",
    BulkPull => "bulk_pull",
    BulkPullAccount => "bulk_pull_account",
    BulkPullFailedAccount => "bulk_pull_failed_account",
    BulkPullRequeued => "bulk_pull_requeued",
    BulkPush => "bulk_push",
    LazyRestart => "lazy_restart",
    AscPullReq => "asc_pull_req",
    AscPullAck => "asc_pull_ack",
    Blocking => "blocking",
    Unblocked => "unblocked",
    Prioritize => "prioritize",
    Deprioritize => "deprioritize",
    Request => "request",
    Reply => "reply",
    Timeout => "timeout",
    DatabaseScan => "database_scan",
    // network
    Keepalive => "keepalive",
    Publish => "publish",
    ConfirmReq => "confirm_req",
    ConfirmAck => "confirm_ack",
    NodeIdHandshake => "node_id_handshake",
    TelemetryReq => "telemetry_req",
    TelemetryAck => "telemetry_ack",
    TcpMaxPerIp => "tcp_max_per_ip",
    TcpMaxPerSubnetwork => "tcp_max_per_subnetwork",
    TcpMaxInbound => "tcp_max_inbound",
    AcceptSuccess => "accept_success",
    AcceptFailure => "accept_failure",
    ConnectSuccess => "connect_success",
    ConnectFailure => "connect_failure",
    Excluded => "excluded",
    Duplicate => "duplicate",
    InvalidMessage => "invalid_message",
    InvalidNetwork => "invalid_network",
    OutdatedVersion => "outdated_version",
    IdleTimeout => "idle_timeout",
    SilentTimeout => "silent_timeout",
    Drop => "drop",
});

stat_enum!(Direction {
    In => "in",
    Out => "out",
});

type StatKey = (StatType, DetailType, Direction);

/// A thread-safe counter collection.
#[derive(Default)]
pub struct Stats {
    counters: RwLock<HashMap<StatKey, AtomicU64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment an inbound counter by one.
    pub fn inc(&self, stat_type: StatType, detail: DetailType) {
        self.add_dir(stat_type, detail, Direction::In, 1);
    }

    pub fn inc_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction) {
        self.add_dir(stat_type, detail, dir, 1);
    }

    pub fn add(&self, stat_type: StatType, detail: DetailType, value: u64) {
        self.add_dir(stat_type, detail, Direction::In, value);
    }

    pub fn add_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction, value: u64) {
        if value == 0 {
            return;
        }
        let key = (stat_type, detail, dir);
        {
            let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(counter) = counters.get(&key) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self, stat_type: StatType, detail: DetailType, dir: Direction) -> u64 {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        counters
            .get(&(stat_type, detail, dir))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All non-zero counters, sorted for stable output.
    pub fn snapshot(&self) -> Vec<(StatType, DetailType, Direction, u64)> {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = counters
            .iter()
            .map(|(&(t, d, dir), v)| (t, d, dir, v.load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }

    pub fn clear(&self) {
        self.counters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_start_at_zero() {
        let stats = Stats::new();
        assert_eq!(
            stats.count(StatType::Ledger, DetailType::Progress, Direction::In),
            0
        );
    }

    #[test]
    fn inc_and_add() {
        let stats = Stats::new();
        stats.inc(StatType::Ledger, DetailType::Progress);
        stats.add(StatType::Ledger, DetailType::Progress, 4);
        stats.inc_dir(StatType::Message, DetailType::Publish, Direction::Out);
        assert_eq!(
            stats.count(StatType::Ledger, DetailType::Progress, Direction::In),
            5
        );
        assert_eq!(
            stats.count(StatType::Message, DetailType::Publish, Direction::Out),
            1
        );
        assert_eq!(
            stats.count(StatType::Message, DetailType::Publish, Direction::In),
            0
        );
    }

    #[test]
    fn snapshot_is_sorted() {
        let stats = Stats::new();
        stats.inc(StatType::Vote, DetailType::Replay);
        stats.inc(StatType::Ledger, DetailType::Old);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, StatType::Ledger);
    }

    #[test]
    fn names_are_snake_case() {
        assert_eq!(DetailType::RollbackFailed.as_str(), "rollback_failed");
        assert_eq!(StatType::ConfirmationHeight.as_str(), "confirmation_height");
    }
}
