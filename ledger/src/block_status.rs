//! Outcome of applying one block to the ledger.

use lattice_utils::DetailType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Applied.
    Progress,
    /// Signature does not match the account or epoch signer.
    BadSignature,
    /// Already in the ledger, or pruned.
    Old,
    /// A legacy send that raises the balance.
    NegativeSpend,
    /// Another block already occupies this slot of the account chain.
    Fork,
    /// The source is not receivable by this account.
    Unreceivable,
    GapPrevious,
    GapSource,
    /// An epoch open for an account with nothing to receive.
    GapEpochOpenPending,
    OpenedBurnAccount,
    BalanceMismatch,
    RepresentativeMismatch,
    /// Block type not allowed at this position (legacy after state, bad epoch).
    BlockPosition,
    InsufficientWork,
    /// Applied, but the batch holding it could not be committed.
    WriteFailed,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Progress => "progress",
            BlockStatus::BadSignature => "bad_signature",
            BlockStatus::Old => "old",
            BlockStatus::NegativeSpend => "negative_spend",
            BlockStatus::Fork => "fork",
            BlockStatus::Unreceivable => "unreceivable",
            BlockStatus::GapPrevious => "gap_previous",
            BlockStatus::GapSource => "gap_source",
            BlockStatus::GapEpochOpenPending => "gap_epoch_open_pending",
            BlockStatus::OpenedBurnAccount => "opened_burn_account",
            BlockStatus::BalanceMismatch => "balance_mismatch",
            BlockStatus::RepresentativeMismatch => "representative_mismatch",
            BlockStatus::BlockPosition => "block_position",
            BlockStatus::InsufficientWork => "insufficient_work",
            BlockStatus::WriteFailed => "write_failed",
        }
    }

    /// Gaps may resolve once the missing dependency arrives.
    pub fn is_gap(&self) -> bool {
        matches!(
            self,
            BlockStatus::GapPrevious | BlockStatus::GapSource | BlockStatus::GapEpochOpenPending
        )
    }
}

impl From<BlockStatus> for DetailType {
    fn from(status: BlockStatus) -> Self {
        match status {
            BlockStatus::Progress => DetailType::Progress,
            BlockStatus::BadSignature => DetailType::BadSignature,
            BlockStatus::Old => DetailType::Old,
            BlockStatus::NegativeSpend => DetailType::NegativeSpend,
            BlockStatus::Fork => DetailType::Fork,
            BlockStatus::Unreceivable => DetailType::Unreceivable,
            BlockStatus::GapPrevious => DetailType::GapPrevious,
            BlockStatus::GapSource => DetailType::GapSource,
            BlockStatus::GapEpochOpenPending => DetailType::GapEpochOpenPending,
            BlockStatus::OpenedBurnAccount => DetailType::OpenedBurnAccount,
            BlockStatus::BalanceMismatch => DetailType::BalanceMismatch,
            BlockStatus::RepresentativeMismatch => DetailType::RepresentativeMismatch,
            BlockStatus::BlockPosition => DetailType::BlockPosition,
            BlockStatus::InsufficientWork => DetailType::InsufficientWork,
            BlockStatus::WriteFailed => DetailType::WriteFailed,
        }
    }
}
