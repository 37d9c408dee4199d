//! Multi-threaded CPU proof-of-work search.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rayon::prelude::*;

use crate::difficulty::difficulty;
use crate::{WorkError, WorkNonce};
use lattice_types::Root;

#[derive(Clone, Copy, Debug, Default)]
pub struct WorkGenerator;

impl WorkGenerator {
    pub fn generate(&self, root: &Root, min_difficulty: u64) -> Result<WorkNonce, WorkError> {
        self.generate_cancellable(root, min_difficulty, &AtomicBool::new(false))
    }

    /// Search the nonce space on the rayon pool from a random offset until
    /// a nonce reaches `min_difficulty` or `cancel` is set.
    pub fn generate_cancellable(
        &self,
        root: &Root,
        min_difficulty: u64,
        cancel: &AtomicBool,
    ) -> Result<WorkNonce, WorkError> {
        if min_difficulty == 0 {
            return Ok(WorkNonce(0));
        }
        let offset: u64 = rand::thread_rng().gen();
        let hit = (0..u64::MAX)
            .into_par_iter()
            .map(|i| i.wrapping_add(offset))
            .find_any(|&nonce| {
                cancel.load(Ordering::Relaxed) || difficulty(root, nonce) >= min_difficulty
            });
        match hit {
            Some(nonce) if difficulty(root, nonce) >= min_difficulty => Ok(WorkNonce(nonce)),
            _ => Err(WorkError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate_work;
    use crate::WorkThresholds;

    #[test]
    fn generated_nonce_meets_threshold() {
        let generator = WorkGenerator;
        let root = Root::new([0x42; 32]);
        let min_difficulty = WorkThresholds::publish_dev().epoch_1;

        let nonce = generator.generate(&root, min_difficulty).unwrap();

        assert!(validate_work(&root, nonce.0, min_difficulty));
    }

    #[test]
    fn zero_threshold_needs_no_search() {
        let generator = WorkGenerator;
        let root = Root::new([0u8; 32]);
        let nonce = generator.generate(&root, 0).unwrap();
        assert_eq!(nonce.0, 0);
        assert!(validate_work(&root, 0, 0));
    }

    #[test]
    fn cancelled_generation_returns_error() {
        let generator = WorkGenerator;
        let cancel = AtomicBool::new(true);
        let result = generator.generate_cancellable(&Root::new([1; 32]), u64::MAX, &cancel);
        assert_eq!(result, Err(WorkError::Cancelled));
    }

    #[test]
    fn validation_threshold_is_inclusive() {
        let root = Root::new([0xAA; 32]);
        let nonce = 12345;
        let value = difficulty(&root, nonce);
        assert!(validate_work(&root, nonce, value));
        if value < u64::MAX {
            assert!(!validate_work(&root, nonce, value + 1));
        }
    }
}
