//! Online representatives and the quorum delta.
//!
//! Quorum is measured against the weight of representatives seen voting
//! recently, not against all delegated weight. The current online weight is
//! sampled into the store and the median of those samples (the trended
//! weight) smooths out dips, so a brief outage cannot lower the bar.

use std::cmp::max;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lattice_ledger::Ledger;
use lattice_types::{unix_millis, Account, Amount};

use crate::config::OnlineRepsConfig;
use crate::error::ConsensusError;

/// Percentage of online weight needed to confirm.
pub const ONLINE_WEIGHT_QUORUM: u128 = 67;

#[derive(Default)]
struct OnlineState {
    reps: HashMap<Account, Instant>,
    online: Amount,
    trended: Amount,
}

pub struct OnlineReps {
    ledger: Arc<Ledger>,
    config: OnlineRepsConfig,
    state: Mutex<OnlineState>,
}

impl OnlineReps {
    pub fn new(ledger: Arc<Ledger>, config: OnlineRepsConfig) -> Self {
        Self {
            ledger,
            config,
            state: Mutex::new(OnlineState::default()),
        }
    }

    /// Load the trended weight from stored samples.
    pub fn initialize(&self) {
        let trended = self.calculate_trend();
        self.state.lock().unwrap().trended = trended;
        tracing::info!(trended = trended.number(), "online weight trend loaded");
    }

    /// Mark `representative` as online. Accounts without weight are ignored.
    pub fn observe(&self, representative: Account, now: Instant) {
        if self.ledger.weight(&representative).is_zero() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let inserted = state.reps.insert(representative, now).is_none();
        let period = self.config.weight_period();
        let before = state.reps.len();
        state
            .reps
            .retain(|_, seen| now.saturating_duration_since(*seen) < period);
        let trimmed = state.reps.len() != before;
        if inserted || trimmed {
            state.online = self.sum_weights(state.reps.keys());
        }
    }

    fn sum_weights<'a>(&self, reps: impl Iterator<Item = &'a Account>) -> Amount {
        reps.map(|rep| self.ledger.weight(rep)).sum()
    }

    pub fn online(&self) -> Amount {
        self.state.lock().unwrap().online
    }

    pub fn trended(&self) -> Amount {
        self.state.lock().unwrap().trended
    }

    pub fn set_online(&self, online: Amount) {
        self.state.lock().unwrap().online = online;
    }

    pub fn set_trended(&self, trended: Amount) {
        self.state.lock().unwrap().trended = trended;
    }

    pub fn online_weight_minimum(&self) -> Amount {
        self.config.online_weight_minimum()
    }

    /// The larger of trended weight and the configured minimum.
    pub fn trended_or_minimum(&self) -> Amount {
        max(self.trended(), self.online_weight_minimum())
    }

    /// Weight needed for quorum: 67% of the largest of online, trended and
    /// the configured minimum.
    pub fn delta(&self) -> Amount {
        let state = self.state.lock().unwrap();
        let base = max(max(state.online, state.trended), self.online_weight_minimum());
        quorum_of(base)
    }

    /// Votes from representatives below this weight are not counted.
    pub fn minimum_principal_weight(&self) -> Amount {
        Amount::raw(self.trended_or_minimum().number() / 1000)
    }

    pub fn list(&self) -> Vec<Account> {
        self.state.lock().unwrap().reps.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().reps.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.reps.clear();
        state.online = Amount::ZERO;
    }

    /// Persist the current online weight and refresh the trend.
    pub fn sample(&self) -> Result<(), ConsensusError> {
        let online = self.online();
        {
            let store = &self.ledger.store;
            let mut txn = store.tx_begin_write();
            while store.online_weight.count(&txn) >= self.config.max_samples as u64 {
                let oldest = store.online_weight.iter(&txn).next().map(|(key, _)| key);
                match oldest {
                    Some(key) => store.online_weight.del(&mut txn, &key),
                    None => break,
                }
            }
            store.online_weight.put(&mut txn, &unix_millis(), &online);
            txn.commit()?;
        }
        let trended = self.calculate_trend();
        self.set_trended(trended);
        tracing::debug!(online = online.number(), trended = trended.number(), "online weight sampled");
        Ok(())
    }

    /// Median of the stored samples, with the configured minimum counted as
    /// one extra sample.
    pub fn calculate_trend(&self) -> Amount {
        let txn = self.ledger.store.tx_begin_read();
        let mut samples: Vec<Amount> = std::iter::once(self.online_weight_minimum())
            .chain(self.ledger.store.online_weight.iter(&txn).map(|(_, weight)| weight))
            .collect();
        samples.sort();
        samples[samples.len() / 2]
    }
}

/// `weight * 67 / 100` without overflowing u128.
pub fn quorum_of(weight: Amount) -> Amount {
    let w = weight.number();
    Amount::raw(w / 100 * ONLINE_WEIGHT_QUORUM + w % 100 * ONLINE_WEIGHT_QUORUM / 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ledger_with_reps, RepFixture};
    use std::time::Duration;

    #[test]
    fn quorum_of_is_exact_and_does_not_overflow() {
        assert_eq!(quorum_of(Amount::raw(100)), Amount::raw(67));
        assert_eq!(quorum_of(Amount::raw(150)), Amount::raw(100));
        assert_eq!(quorum_of(Amount::raw(1)), Amount::ZERO);
        assert_eq!(quorum_of(Amount::MAX).number(), u128::MAX / 100 * 67 + 55 * 67 / 100);
    }

    #[test]
    fn observe_counts_weighted_reps_only() {
        let RepFixture { ledger, reps, .. } = ledger_with_reps(&[300, 200]);
        let online = OnlineReps::new(ledger, OnlineRepsConfig::dev());
        let now = Instant::now();
        online.observe(reps[0].account(), now);
        online.observe(Account::new([77; 32]), now);
        assert_eq!(online.count(), 1);
        assert_eq!(online.online(), Amount::raw(300));
        online.observe(reps[1].account(), now);
        assert_eq!(online.online(), Amount::raw(500));
        assert_eq!(online.delta(), Amount::raw(335));
    }

    #[test]
    fn stale_reps_drop_out() {
        let RepFixture { ledger, reps, .. } = ledger_with_reps(&[300, 200]);
        let config = OnlineRepsConfig::dev();
        let period = config.weight_period();
        let online = OnlineReps::new(ledger, config);
        let now = Instant::now();
        online.observe(reps[0].account(), now);
        online.observe(reps[1].account(), now + period);
        assert_eq!(online.online(), Amount::raw(200));
        assert_eq!(online.list(), vec![reps[1].account()]);
    }

    #[test]
    fn samples_are_capped_and_trended() {
        let RepFixture { ledger, reps, .. } = ledger_with_reps(&[300]);
        let config = OnlineRepsConfig {
            max_samples: 3,
            ..OnlineRepsConfig::dev()
        };
        let online = OnlineReps::new(Arc::clone(&ledger), config);
        online.observe(reps[0].account(), Instant::now());
        for _ in 0..5 {
            online.sample().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        let txn = ledger.store.tx_begin_read();
        assert_eq!(ledger.store.online_weight.count(&txn), 3);
        // Samples [0 (minimum), 300, 300, 300]: median is 300.
        assert_eq!(online.trended(), Amount::raw(300));
    }

    #[test]
    fn delta_never_below_minimum() {
        let RepFixture { ledger, .. } = ledger_with_reps(&[]);
        let online = OnlineReps::new(ledger, OnlineRepsConfig::default());
        assert_eq!(online.delta(), quorum_of(Amount::coins(60_000_000)));
    }
}
