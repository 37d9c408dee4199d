//! Node configuration with TOML file support.
//!
//! Every section has serde defaults, so an empty file is a valid
//! configuration and a partial file only overrides what it names.

use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lattice_consensus::{
    ActiveElectionsConfig, HintedSchedulerConfig, OnlineRepsConfig, OptimisticSchedulerConfig,
    PrioritySchedulerConfig, RepCrawlerConfig, RequestAggregatorConfig, VoteCacheConfig,
    VoteProcessorConfig,
};
use lattice_ledger::LedgerConstants;
use lattice_network::tcp_channel::DEFAULT_QUEUE_SIZE;
use lattice_network::{ConnectionLimits, TcpListenerConfig};
use lattice_store_lmdb::LmdbConfig;
use lattice_types::{NetworkConstants, NetworkId};

use crate::logging::LogFormat;
use crate::NodeError;

/// Fixed per-network bootstrap limits.
#[derive(Clone, Debug)]
pub struct BootstrapConstants {
    /// Retry budget of a legacy pull.
    pub legacy_requeued_pulls_limit: u32,
    /// Retry budget of a lazy pull.
    pub lazy_requeued_pulls_limit: u32,
    pub frontier_retry_limit: u32,
    /// Blocks requested per lazy bulk_pull.
    pub lazy_max_pull_blocks: u32,
    /// A lazy attempt stops after processing this many blocks.
    pub lazy_blocks_restart_limit: u64,
    /// Pulls that returned at least this many blocks are remembered by the
    /// pulls cache.
    pub pull_cache_threshold: u64,
}

impl BootstrapConstants {
    pub fn new(network: NetworkId) -> Self {
        Self {
            legacy_requeued_pulls_limit: 4,
            lazy_requeued_pulls_limit: 10,
            frontier_retry_limit: 16,
            lazy_max_pull_blocks: if network.is_dev() { 2 } else { 512 },
            lazy_blocks_restart_limit: 4 * 1024 * 1024,
            pull_cache_threshold: if network.is_dev() { 2 } else { 10_000 },
        }
    }
}

/// Constants derived from the network id. Built once per node.
#[derive(Clone)]
pub struct NetworkParams {
    pub network: NetworkConstants,
    pub ledger: LedgerConstants,
    pub bootstrap: BootstrapConstants,
}

impl NetworkParams {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network: NetworkConstants::new(network),
            ledger: LedgerConstants::new(network),
            bootstrap: BootstrapConstants::new(network),
        }
    }

    pub fn dev() -> Self {
        Self::new(NetworkId::Dev)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationHeightMode {
    /// Unbounded while the uncemented backlog is small, bounded otherwise.
    #[default]
    Automatic,
    Unbounded,
    Bounded,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmationHeightConfig {
    #[serde(default)]
    pub mode: ConfirmationHeightMode,
    /// Blocks cemented per write transaction.
    #[serde(default = "default_batch_write_size")]
    pub batch_write_size: usize,
}

fn default_batch_write_size() -> usize {
    16384
}

impl Default for ConfirmationHeightConfig {
    fn default() -> Self {
        Self {
            mode: ConfirmationHeightMode::Automatic,
            batch_write_size: default_batch_write_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockProcessorConfig {
    /// Queue size for each network-facing source.
    #[serde(default = "default_max_peer_queue")]
    pub max_peer_queue: usize,
    /// Queue size for bootstrap, unchecked and local sources.
    #[serde(default = "default_max_system_queue")]
    pub max_system_queue: usize,
    /// Round robin weights.
    #[serde(default = "default_priority_live")]
    pub priority_live: usize,
    #[serde(default = "default_priority_bootstrap")]
    pub priority_bootstrap: usize,
    #[serde(default = "default_priority_local")]
    pub priority_local: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_max_time_ms")]
    pub batch_max_time_ms: u64,
    #[serde(default = "default_unchecked_max")]
    pub unchecked_max: usize,
    /// Unchecked entries older than this are dropped.
    #[serde(default = "default_unchecked_cutoff_secs")]
    pub unchecked_cutoff_secs: u64,
}

fn default_max_peer_queue() -> usize {
    128
}

fn default_max_system_queue() -> usize {
    16 * 1024
}

fn default_priority_live() -> usize {
    1
}

fn default_priority_bootstrap() -> usize {
    8
}

fn default_priority_local() -> usize {
    16
}

fn default_batch_size() -> usize {
    256
}

fn default_batch_max_time_ms() -> u64 {
    500
}

fn default_unchecked_max() -> usize {
    64 * 1024
}

fn default_unchecked_cutoff_secs() -> u64 {
    4 * 60 * 60
}

impl BlockProcessorConfig {
    pub fn batch_max_time(&self) -> Duration {
        Duration::from_millis(self.batch_max_time_ms)
    }
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        Self {
            max_peer_queue: default_max_peer_queue(),
            max_system_queue: default_max_system_queue(),
            priority_live: default_priority_live(),
            priority_bootstrap: default_priority_bootstrap(),
            priority_local: default_priority_local(),
            batch_size: default_batch_size(),
            batch_max_time_ms: default_batch_max_time_ms(),
            unchecked_max: default_unchecked_max(),
            unchecked_cutoff_secs: default_unchecked_cutoff_secs(),
        }
    }
}

/// Listener caps and connection timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_max_inbound")]
    pub max_inbound: usize,
    #[serde(default = "default_true")]
    pub allow_local_peers: bool,
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Outbound queue budget per channel and traffic type.
    #[serde(default = "default_channel_queue")]
    pub max_queue: usize,
    /// Outbound connections attempted per keepalive received.
    #[serde(default = "default_keepalive_connects")]
    pub keepalive_connects: usize,
}

fn default_max_inbound() -> usize {
    128
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_channel_queue() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_keepalive_connects() -> usize {
    2
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_inbound: default_max_inbound(),
            allow_local_peers: true,
            handshake_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            max_queue: default_channel_queue(),
            keepalive_connects: default_keepalive_connects(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Pooled connections a legacy or lazy attempt opens.
    #[serde(default = "default_bootstrap_connections")]
    pub connections: usize,
    #[serde(default = "default_bootstrap_connections_max")]
    pub connections_max: usize,
    #[serde(default = "default_frontier_request_count")]
    pub frontier_request_count: u32,
    #[serde(default)]
    pub disable_legacy: bool,
    #[serde(default)]
    pub disable_lazy: bool,
    #[serde(default)]
    pub disable_bulk_push_client: bool,
    /// How long a client waits for one response message.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_pulls_cache_size")]
    pub pulls_cache_size: usize,
    /// Gap cache voters must reach `trended / 256 * numerator` weight before
    /// a missing block is bootstrapped.
    #[serde(default = "default_bootstrap_fraction_numerator")]
    pub fraction_numerator: u32,
}

fn default_bootstrap_connections() -> usize {
    4
}

fn default_bootstrap_connections_max() -> usize {
    64
}

fn default_frontier_request_count() -> u32 {
    1024 * 1024
}

fn default_io_timeout_ms() -> u64 {
    15_000
}

fn default_pulls_cache_size() -> usize {
    10_000
}

fn default_bootstrap_fraction_numerator() -> u32 {
    1
}

impl BootstrapConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            connections: default_bootstrap_connections(),
            connections_max: default_bootstrap_connections_max(),
            frontier_request_count: default_frontier_request_count(),
            disable_legacy: false,
            disable_lazy: false,
            disable_bulk_push_client: false,
            io_timeout_ms: default_io_timeout_ms(),
            pulls_cache_size: default_pulls_cache_size(),
            fraction_numerator: default_bootstrap_fraction_numerator(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapAscendingConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_true")]
    pub enable_database_scan: bool,
    /// Outstanding requests per channel.
    #[serde(default = "default_channel_limit")]
    pub channel_limit: usize,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_max_pull_count")]
    pub max_pull_count: u8,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Requests pause while the block processor holds more than this.
    #[serde(default = "default_block_processor_threshold")]
    pub block_processor_threshold: usize,
    #[serde(default = "default_priorities_max")]
    pub priorities_max: usize,
    #[serde(default = "default_priorities_max")]
    pub blocking_max: usize,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_channel_limit() -> usize {
    16
}

fn default_max_requests() -> usize {
    1024
}

fn default_max_pull_count() -> u8 {
    lattice_messages::AscPullReq::MAX_BLOCKS
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_block_processor_threshold() -> usize {
    1000
}

fn default_priorities_max() -> usize {
    256 * 1024
}

fn default_cooldown_ms() -> u64 {
    3000
}

impl BootstrapAscendingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for BootstrapAscendingConfig {
    fn default() -> Self {
        Self {
            enable: true,
            enable_database_scan: true,
            channel_limit: default_channel_limit(),
            max_requests: default_max_requests(),
            max_pull_count: default_max_pull_count(),
            request_timeout_ms: default_request_timeout_ms(),
            block_processor_threshold: default_block_processor_threshold(),
            priorities_max: default_priorities_max(),
            blocking_max: default_priorities_max(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Configuration for a node.
///
/// Loaded with [`NodeConfig::from_toml_file`] or built in code for tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Directory holding the ledger database and node key.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Peering port; 0 picks a free one.
    #[serde(default = "default_peering_port")]
    pub peering_port: u16,

    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// `host:port` peers contacted at startup.
    #[serde(default)]
    pub preconfigured_peers: Vec<String>,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub enable_metrics: bool,

    /// Hex private keys of the representatives this node votes for.
    #[serde(default)]
    pub voting_keys: Vec<String>,

    #[serde(default)]
    pub lmdb: LmdbConfig,
    #[serde(default)]
    pub block_processor: BlockProcessorConfig,
    #[serde(default)]
    pub confirmation_height: ConfirmationHeightConfig,
    #[serde(default)]
    pub network_config: NetworkConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub bootstrap_ascending: BootstrapAscendingConfig,
    #[serde(default)]
    pub active_elections: ActiveElectionsConfig,
    #[serde(default)]
    pub vote_processor: VoteProcessorConfig,
    #[serde(default)]
    pub request_aggregator: RequestAggregatorConfig,
    #[serde(default)]
    pub vote_cache: VoteCacheConfig,
    #[serde(default = "default_online_reps")]
    pub online_reps: OnlineRepsConfig,
    #[serde(default)]
    pub priority_scheduler: PrioritySchedulerConfig,
    #[serde(default)]
    pub hinted_scheduler: HintedSchedulerConfig,
    #[serde(default)]
    pub optimistic_scheduler: OptimisticSchedulerConfig,
    #[serde(default)]
    pub rep_crawler: RepCrawlerConfig,
}

// Serde default helpers

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./lattice_data")
}

fn default_peering_port() -> u16 {
    NetworkId::Dev.default_port()
}

fn default_listen_address() -> IpAddr {
    IpAddr::V6(Ipv6Addr::UNSPECIFIED)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_online_reps() -> OnlineRepsConfig {
    OnlineRepsConfig::dev()
}

impl NodeConfig {
    /// Defaults for `network`. Only dev networks drop the online weight floor.
    pub fn for_network(network: NetworkId) -> Self {
        Self {
            network,
            peering_port: network.default_port(),
            online_reps: if network.is_dev() {
                OnlineRepsConfig::dev()
            } else {
                OnlineRepsConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn connection_limits(&self, constants: &NetworkConstants) -> ConnectionLimits {
        ConnectionLimits {
            max_inbound: self.network_config.max_inbound,
            max_peers_per_ip: constants.max_peers_per_ip,
            max_peers_per_subnetwork: constants.max_peers_per_subnetwork,
            allow_local_peers: self.network_config.allow_local_peers,
        }
    }

    pub fn listener_config(&self) -> TcpListenerConfig {
        TcpListenerConfig {
            listen_address: self.listen_address,
            port: self.peering_port,
            handshake_timeout: Duration::from_millis(self.network_config.handshake_timeout_ms),
            connect_timeout: Duration::from_millis(self.network_config.connect_timeout_ms),
            max_queue: self.network_config.max_queue,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_path: default_data_path(),
            peering_port: default_peering_port(),
            listen_address: default_listen_address(),
            preconfigured_peers: Vec::new(),
            log_format: LogFormat::Human,
            log_level: default_log_level(),
            enable_metrics: false,
            voting_keys: Vec::new(),
            lmdb: LmdbConfig::default(),
            block_processor: BlockProcessorConfig::default(),
            confirmation_height: ConfirmationHeightConfig::default(),
            network_config: NetworkConfig::default(),
            bootstrap: BootstrapConfig::default(),
            bootstrap_ascending: BootstrapAscendingConfig::default(),
            active_elections: ActiveElectionsConfig::default(),
            vote_processor: VoteProcessorConfig::default(),
            request_aggregator: RequestAggregatorConfig::default(),
            vote_cache: VoteCacheConfig::default(),
            online_reps: default_online_reps(),
            priority_scheduler: PrioritySchedulerConfig::default(),
            hinted_scheduler: HintedSchedulerConfig::default(),
            optimistic_scheduler: OptimisticSchedulerConfig::default(),
            rep_crawler: RepCrawlerConfig::default(),
        }
    }
}
