use std::collections::HashMap;
use std::sync::RwLock;

use lattice_types::{Account, Amount};

/// Voting weight delegated to each representative.
///
/// Rebuilt from the account table at startup and kept current by block
/// insertion and rollback.
#[derive(Default)]
pub struct RepWeights {
    weights: RwLock<HashMap<Account, Amount>>,
}

impl RepWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(&self, representative: &Account) -> Amount {
        self.weights
            .read()
            .unwrap()
            .get(representative)
            .copied()
            .unwrap_or_default()
    }

    pub fn add(&self, representative: Account, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        let mut weights = self.weights.write().unwrap();
        let entry = weights.entry(representative).or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn sub(&self, representative: Account, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        let mut weights = self.weights.write().unwrap();
        if let Some(entry) = weights.get_mut(&representative) {
            *entry = entry.saturating_sub(amount);
            if entry.is_zero() {
                weights.remove(&representative);
            }
        }
    }

    /// Move `old_balance` away from `old_rep` and `new_balance` onto `new_rep`.
    pub fn transfer(
        &self,
        old_rep: Account,
        old_balance: Amount,
        new_rep: Account,
        new_balance: Amount,
    ) {
        self.sub(old_rep, old_balance);
        self.add(new_rep, new_balance);
    }

    pub fn merge(&self, other: HashMap<Account, Amount>) {
        for (rep, amount) in other {
            self.add(rep, amount);
        }
    }

    pub fn snapshot(&self) -> HashMap<Account, Amount> {
        self.weights.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.weights.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.weights.write().unwrap().clear();
    }
}
