//! Tunables for the consensus components, loaded as sections of the node's
//! TOML configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lattice_types::Amount;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveElectionsConfig {
    /// Soft limit on priority elections; hinted and optimistic limits are
    /// percentages of it.
    #[serde(default = "default_active_elections_size")]
    pub size: usize,
    #[serde(default = "default_hinted_limit_percentage")]
    pub hinted_limit_percentage: usize,
    #[serde(default = "default_optimistic_limit_percentage")]
    pub optimistic_limit_percentage: usize,
    /// Elections whose winner is re-broadcast per solicitor round.
    #[serde(default = "default_max_election_broadcasts")]
    pub max_election_broadcasts: usize,
    /// Confirm_req messages sent per solicitor round.
    #[serde(default = "default_max_election_requests")]
    pub max_election_requests: usize,
    #[serde(default = "default_confirmation_history_size")]
    pub confirmation_history_size: usize,
    /// Capacity of the recently confirmed set.
    #[serde(default = "default_confirmation_cache")]
    pub confirmation_cache: usize,
}

fn default_active_elections_size() -> usize {
    5000
}

fn default_hinted_limit_percentage() -> usize {
    20
}

fn default_optimistic_limit_percentage() -> usize {
    10
}

fn default_max_election_broadcasts() -> usize {
    50
}

fn default_max_election_requests() -> usize {
    50
}

fn default_confirmation_history_size() -> usize {
    2048
}

fn default_confirmation_cache() -> usize {
    65536
}

impl Default for ActiveElectionsConfig {
    fn default() -> Self {
        Self {
            size: default_active_elections_size(),
            hinted_limit_percentage: default_hinted_limit_percentage(),
            optimistic_limit_percentage: default_optimistic_limit_percentage(),
            max_election_broadcasts: default_max_election_broadcasts(),
            max_election_requests: default_max_election_requests(),
            confirmation_history_size: default_confirmation_history_size(),
            confirmation_cache: default_confirmation_cache(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteProcessorConfig {
    #[serde(default = "default_vote_capacity")]
    pub max_queue: usize,
    #[serde(default = "default_vote_batch_size")]
    pub batch_size: usize,
}

fn default_vote_capacity() -> usize {
    144 * 1024
}

fn default_vote_batch_size() -> usize {
    1024
}

impl Default for VoteProcessorConfig {
    fn default() -> Self {
        Self {
            max_queue: default_vote_capacity(),
            batch_size: default_vote_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestAggregatorConfig {
    /// Pending requests held before new ones are dropped.
    #[serde(default = "default_aggregator_max_queue")]
    pub max_queue: usize,
    #[serde(default = "default_aggregator_batch_size")]
    pub batch_size: usize,
}

fn default_aggregator_max_queue() -> usize {
    128
}

fn default_aggregator_batch_size() -> usize {
    16
}

impl Default for RequestAggregatorConfig {
    fn default() -> Self {
        Self {
            max_queue: default_aggregator_max_queue(),
            batch_size: default_aggregator_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteCacheConfig {
    #[serde(default = "default_vote_cache_size")]
    pub max_size: usize,
    /// Voters remembered per block hash.
    #[serde(default = "default_vote_cache_voters")]
    pub max_voters: usize,
    #[serde(default = "default_vote_cache_age_secs")]
    pub age_cutoff_secs: u64,
}

fn default_vote_cache_size() -> usize {
    64 * 1024
}

fn default_vote_cache_voters() -> usize {
    64
}

fn default_vote_cache_age_secs() -> u64 {
    15 * 60
}

impl VoteCacheConfig {
    pub fn age_cutoff(&self) -> Duration {
        Duration::from_secs(self.age_cutoff_secs)
    }
}

impl Default for VoteCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_vote_cache_size(),
            max_voters: default_vote_cache_voters(),
            age_cutoff_secs: default_vote_cache_age_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnlineRepsConfig {
    /// Floor for the quorum base, in whole coins.
    #[serde(default = "default_online_weight_minimum")]
    pub online_weight_minimum_coins: u64,
    /// How long an observed representative counts as online.
    #[serde(default = "default_weight_period_secs")]
    pub weight_period_secs: u64,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_online_weight_minimum() -> u64 {
    60_000_000
}

fn default_weight_period_secs() -> u64 {
    5 * 60
}

fn default_max_samples() -> usize {
    4032
}

impl OnlineRepsConfig {
    pub fn online_weight_minimum(&self) -> Amount {
        Amount::coins(self.online_weight_minimum_coins as u128)
    }

    pub fn weight_period(&self) -> Duration {
        Duration::from_secs(self.weight_period_secs)
    }

    /// Dev networks start from zero so a single test representative can
    /// reach quorum.
    pub fn dev() -> Self {
        Self {
            online_weight_minimum_coins: 0,
            weight_period_secs: 1,
            max_samples: 64,
        }
    }
}

impl Default for OnlineRepsConfig {
    fn default() -> Self {
        Self {
            online_weight_minimum_coins: default_online_weight_minimum(),
            weight_period_secs: default_weight_period_secs(),
            max_samples: default_max_samples(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrioritySchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Waiting blocks held per balance bucket.
    #[serde(default = "default_bucket_max_blocks")]
    pub bucket_max_blocks: usize,
}

fn default_true() -> bool {
    true
}

fn default_bucket_max_blocks() -> usize {
    250
}

impl Default for PrioritySchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_max_blocks: default_bucket_max_blocks(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HintedSchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Percentage of online weight a cached tally needs before a hinted
    /// election is started.
    #[serde(default = "default_hinting_threshold_percent")]
    pub hinting_threshold_percent: u8,
    #[serde(default = "default_hinted_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_hinting_threshold_percent() -> u8 {
    10
}

fn default_hinted_check_interval_ms() -> u64 {
    1000
}

impl Default for HintedSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hinting_threshold_percent: default_hinting_threshold_percent(),
            check_interval_ms: default_hinted_check_interval_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimisticSchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Unconfirmed blocks an account needs before its head is activated.
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: u64,
    #[serde(default = "default_optimistic_max_size")]
    pub max_size: usize,
}

fn default_gap_threshold() -> u64 {
    32
}

fn default_optimistic_max_size() -> usize {
    1024 * 64
}

impl Default for OptimisticSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gap_threshold: default_gap_threshold(),
            max_size: default_optimistic_max_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepCrawlerConfig {
    #[serde(default = "default_rep_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Channels probed per crawl.
    #[serde(default = "default_rep_crawl_fanout")]
    pub crawl_fanout: usize,
}

fn default_rep_query_timeout_ms() -> u64 {
    60_000
}

fn default_rep_crawl_fanout() -> usize {
    15
}

impl RepCrawlerConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for RepCrawlerConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_rep_query_timeout_ms(),
            crawl_fanout: default_rep_crawl_fanout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_elections_defaults() {
        let config = ActiveElectionsConfig::default();
        assert_eq!(config.size, 5000);
        assert_eq!(config.hinted_limit_percentage, 20);
        assert_eq!(config.optimistic_limit_percentage, 10);
    }

    #[test]
    fn aggregator_queue_defaults_to_128() {
        assert_eq!(RequestAggregatorConfig::default().max_queue, 128);
    }
}
