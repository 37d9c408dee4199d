//! Representatives reachable over a known channel.
//!
//! Filled by the rep crawler when a queried channel answers with a vote;
//! read by the solicitor and the vote generator to target principal
//! representatives directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_network::{Channel, ChannelId};
use lattice_types::{Account, Amount};
use lattice_utils::{DetailType, StatType, Stats};

use crate::online_reps::OnlineReps;

#[derive(Clone)]
pub struct PeeredRep {
    pub account: Account,
    pub channel: Arc<dyn Channel>,
    pub last_request: Option<Instant>,
    pub last_response: Instant,
}

impl PeeredRep {
    pub fn channel_id(&self) -> ChannelId {
        self.channel.channel_id()
    }
}

pub enum RegisterResult {
    Inserted,
    Updated,
    /// The representative moved; holds the previous channel.
    ChannelChanged(Arc<dyn Channel>),
}

pub struct RepresentativeRegister {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    stats: Arc<Stats>,
    reps: Mutex<HashMap<Account, PeeredRep>>,
}

impl RepresentativeRegister {
    pub fn new(ledger: Arc<Ledger>, online_reps: Arc<OnlineReps>, stats: Arc<Stats>) -> Self {
        Self {
            ledger,
            online_reps,
            stats,
            reps: Mutex::new(HashMap::new()),
        }
    }

    pub fn update_or_insert(
        &self,
        account: Account,
        channel: Arc<dyn Channel>,
        now: Instant,
    ) -> RegisterResult {
        let mut reps = self.reps.lock().unwrap();
        match reps.get_mut(&account) {
            Some(rep) => {
                rep.last_response = now;
                if rep.channel.channel_id() != channel.channel_id() {
                    let previous = std::mem::replace(&mut rep.channel, channel);
                    self.stats.inc(StatType::RepCrawler, DetailType::ChannelChanged);
                    RegisterResult::ChannelChanged(previous)
                } else {
                    RegisterResult::Updated
                }
            }
            None => {
                reps.insert(
                    account,
                    PeeredRep {
                        account,
                        channel,
                        last_request: None,
                        last_response: now,
                    },
                );
                self.stats.inc(StatType::RepCrawler, DetailType::Insert);
                RegisterResult::Inserted
            }
        }
    }

    /// Whether a principal representative is known on `channel`.
    pub fn is_pr(&self, channel: ChannelId) -> bool {
        let minimum = self.online_reps.minimum_principal_weight();
        self.reps
            .lock()
            .unwrap()
            .values()
            .any(|r| r.channel_id() == channel && self.ledger.weight(&r.account) >= minimum)
    }

    /// Known representatives with at least `min_weight`, heaviest first.
    pub fn representatives(&self, max: usize, min_weight: Amount) -> Vec<PeeredRep> {
        let mut weighted: Vec<(Amount, PeeredRep)> = self
            .reps
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.channel.is_alive())
            .map(|r| (self.ledger.weight(&r.account), r.clone()))
            .filter(|(w, _)| *w >= min_weight && !w.is_zero())
            .collect();
        weighted.sort_by(|a, b| b.0.cmp(&a.0));
        weighted.into_iter().take(max).map(|(_, r)| r).collect()
    }

    pub fn principal_representatives(&self, max: usize) -> Vec<PeeredRep> {
        self.representatives(max, self.online_reps.minimum_principal_weight())
    }

    /// Sum of the weights of all known representatives.
    pub fn total_weight(&self) -> Amount {
        self.reps
            .lock()
            .unwrap()
            .keys()
            .map(|account| self.ledger.weight(account))
            .sum()
    }

    /// Stamp every representative on `channel` as just queried.
    pub fn on_rep_request(&self, channel: ChannelId, now: Instant) {
        for rep in self.reps.lock().unwrap().values_mut() {
            if rep.channel_id() == channel {
                rep.last_request = Some(now);
            }
        }
    }

    /// Time since any representative on `channel` was last queried.
    pub fn last_request_elapsed(&self, channel: ChannelId, now: Instant) -> Option<Duration> {
        self.reps
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.channel_id() == channel)
            .filter_map(|r| r.last_request)
            .max()
            .map(|at| now.saturating_duration_since(at))
    }

    /// Forget representatives whose channel died.
    pub fn cleanup(&self) {
        let mut reps = self.reps.lock().unwrap();
        let before = reps.len();
        reps.retain(|account, rep| {
            let alive = rep.channel.is_alive();
            if !alive {
                tracing::info!(rep = %account, channel = %rep.channel_id(), "representative channel closed");
            }
            alive
        });
        let removed = before - reps.len();
        if removed > 0 {
            self.stats.add(StatType::RepCrawler, DetailType::ChannelDead, removed as u64);
        }
    }

    pub fn len(&self) -> usize {
        self.reps.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnlineRepsConfig;
    use crate::testing::{ledger_with_reps, RepFixture};
    use lattice_nullables::NullChannel;

    fn register(weights: &[u128]) -> (RepresentativeRegister, RepFixture) {
        let fixture = ledger_with_reps(weights);
        let online = Arc::new(OnlineReps::new(Arc::clone(&fixture.ledger), OnlineRepsConfig::dev()));
        let register =
            RepresentativeRegister::new(Arc::clone(&fixture.ledger), online, Arc::new(Stats::new()));
        (register, fixture)
    }

    #[test]
    fn insert_update_and_channel_change() {
        let (register, fixture) = register(&[100]);
        let rep = fixture.reps[0].account();
        let now = Instant::now();
        assert!(matches!(
            register.update_or_insert(rep, NullChannel::new(1), now),
            RegisterResult::Inserted
        ));
        assert!(matches!(
            register.update_or_insert(rep, NullChannel::new(1), now),
            RegisterResult::Updated
        ));
        match register.update_or_insert(rep, NullChannel::new(2), now) {
            RegisterResult::ChannelChanged(previous) => assert_eq!(previous.channel_id(), ChannelId(1)),
            _ => panic!("expected channel change"),
        }
        assert_eq!(register.len(), 1);
    }

    #[test]
    fn representatives_sorted_by_weight_and_filtered() {
        let (register, fixture) = register(&[100, 300, 50]);
        let now = Instant::now();
        for (i, key) in fixture.reps.iter().enumerate() {
            register.update_or_insert(key.account(), NullChannel::new(i + 1), now);
        }
        let reps = register.representatives(usize::MAX, Amount::raw(60));
        let accounts: Vec<Account> = reps.iter().map(|r| r.account).collect();
        assert_eq!(accounts, vec![fixture.reps[1].account(), fixture.reps[0].account()]);
        assert_eq!(register.representatives(1, Amount::ZERO).len(), 1);
        assert_eq!(register.total_weight(), Amount::raw(450));
    }

    #[test]
    fn dead_channels_are_cleaned_up() {
        let (register, fixture) = register(&[100, 200]);
        let now = Instant::now();
        let dead = NullChannel::new(1);
        register.update_or_insert(fixture.reps[0].account(), dead.clone(), now);
        register.update_or_insert(fixture.reps[1].account(), NullChannel::new(2), now);
        dead.close();
        assert_eq!(register.representatives(usize::MAX, Amount::ZERO).len(), 1);
        register.cleanup();
        assert_eq!(register.len(), 1);
    }

    #[test]
    fn request_times_tracked_per_channel() {
        let (register, fixture) = register(&[100]);
        let now = Instant::now();
        register.update_or_insert(fixture.reps[0].account(), NullChannel::new(7), now);
        assert_eq!(register.last_request_elapsed(ChannelId(7), now), None);
        register.on_rep_request(ChannelId(7), now);
        assert_eq!(
            register.last_request_elapsed(ChannelId(7), now + Duration::from_secs(2)),
            Some(Duration::from_secs(2))
        );
    }
}
