use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkError {
    #[error("work difficulty {actual:#018x} below minimum {minimum:#018x}")]
    InsufficientDifficulty { actual: u64, minimum: u64 },

    #[error("work generation cancelled")]
    Cancelled,
}
