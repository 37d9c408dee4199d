use thiserror::Error;

use lattice_ledger::LedgerError;
use lattice_store::StoreError;
use lattice_types::TypesError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("vote construction: {0}")]
    Vote(#[from] TypesError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Spawn a named worker thread, mapping the OS error.
pub(crate) fn spawn_named<F>(
    name: &'static str,
    f: F,
) -> Result<std::thread::JoinHandle<()>, ConsensusError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| ConsensusError::Spawn { name, source })
}
