//! LMDB storage engine for the lattice node.
//!
//! Every [`Table`](lattice_store::Table) maps to one named database inside a
//! single environment file. Readers pin an LMDB snapshot for their lifetime;
//! the writer buffers changes and applies them in one LMDB write transaction
//! per commit.

pub mod environment;
pub mod error;
pub mod transaction;

pub use environment::{LmdbConfig, LmdbEngine, SyncStrategy};
pub use error::LmdbError;
