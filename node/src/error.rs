use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger error: {0}")]
    Ledger(#[from] lattice_ledger::LedgerError),

    #[error("network error: {0}")]
    Network(#[from] lattice_network::NetworkError),

    #[error("consensus error: {0}")]
    Consensus(#[from] lattice_consensus::ConsensusError),

    #[error("store error: {0}")]
    Store(#[from] lattice_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] lattice_store_lmdb::LmdbError),

    #[error("config error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Spawn a named worker thread.
pub(crate) fn spawn_named<F>(name: &'static str, f: F) -> Result<std::thread::JoinHandle<()>, NodeError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| NodeError::Spawn { name, source })
}
