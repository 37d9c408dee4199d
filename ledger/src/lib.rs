//! Block-lattice ledger.
//!
//! Each account owns its own chain. The ledger validates and applies blocks,
//! rolls back chains that lost an election, and cements confirmed blocks by
//! raising per-account confirmation heights. Representative weights are kept
//! in memory and follow every balance or representative change.

pub mod block_status;
mod cementer;
pub mod constants;
pub mod error;
pub mod lattice_builder;
pub mod ledger;
pub mod rep_weights;
mod rollback;
mod validation;
pub mod write_queue;

pub use block_status::BlockStatus;
pub use constants::{epoch_link, Epochs, LedgerConstants};
pub use error::LedgerError;
pub use lattice_builder::{AccountChainBuilder, LatticeBuilder};
pub use ledger::{Ledger, LedgerCache};
pub use rep_weights::RepWeights;
pub use write_queue::{WriteGuard, WriteQueue, Writer};
