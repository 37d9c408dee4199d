//! Catching up with the network.
//!
//! Three strategies share one block processor:
//!
//! * legacy attempts diff account frontiers with a peer and pull whole
//!   account chains;
//! * lazy attempts start from a hash the network voted for and pull
//!   backwards along previous and source links;
//! * the ascending service continuously asks peers for the blocks that
//!   follow each account's local head.
//!
//! [`BootstrapServer`] answers the same requests for other nodes.

mod account_sets;
mod ascending;
mod attempt;
mod client;
mod initiator;
mod lazy;
mod legacy;
mod pull;
mod pulls_cache;
mod server;

pub use account_sets::{AccountSets, AccountSetsConfig};
pub use ascending::BootstrapAscending;
pub use attempt::{AttemptState, BootstrapAttempt, BootstrapAttempts, BootstrapMode};
pub use client::{BootstrapClient, BootstrapConnections, BootstrapConnector, TcpBootstrapConnector};
pub use initiator::BootstrapInitiator;
pub use lazy::LazyAttempt;
pub use legacy::LegacyAttempt;
pub use pull::PullInfo;
pub use pulls_cache::PullsCache;
pub use server::BootstrapServer;
