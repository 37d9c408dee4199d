//! Lattice node: block processing, cementing and bootstrap around the
//! consensus engines.
//!
//! The node owns the ledger and:
//! - Processes blocks from peers, bootstrap and local wallets
//! - Holds blocks with missing dependencies until they arrive
//! - Cements confirmed election winners
//! - Pulls missing chains from peers and serves its own
//! - Exchanges signed telemetry with its peers

pub mod block_processor;
pub mod bootstrap;
pub mod cementing;
pub mod config;
pub mod error;
pub mod gap_cache;
pub mod logging;
pub mod message_processor;
pub mod metrics;
pub mod node;
pub mod shutdown;
pub mod telemetry;
pub mod unchecked;

pub use block_processor::{BlockProcessor, BlockSource, ProcessedBlock};
pub use bootstrap::{
    BootstrapAscending, BootstrapAttempt, BootstrapInitiator, BootstrapMode, BootstrapServer,
};
pub use cementing::ConfirmationHeightProcessor;
pub use config::{
    BlockProcessorConfig, BootstrapAscendingConfig, BootstrapConfig, BootstrapConstants,
    ConfirmationHeightConfig, ConfirmationHeightMode, NetworkConfig, NetworkParams, NodeConfig,
};
pub use error::NodeError;
pub use gap_cache::GapCache;
pub use logging::{init_logging, LogFormat};
pub use message_processor::MessageProcessor;
pub use metrics::NodeMetrics;
pub use node::Node;
pub use shutdown::ShutdownController;
pub use telemetry::Telemetry;
pub use unchecked::{UncheckedEntry, UncheckedMap};
