use lattice_types::{Account, BlockHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("block {0} is cemented and cannot be rolled back")]
    BlockConfirmed(BlockHash),

    #[error("account not found: {0}")]
    AccountNotFound(Account),

    #[error("storage error: {0}")]
    Storage(#[from] lattice_store::StoreError),
}
