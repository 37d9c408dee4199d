//! Starts and tracks legacy and lazy bootstrap attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use lattice_ledger::Ledger;
use lattice_types::HashOrAccount;
use lattice_utils::{DetailType, StatType, Stats};

use super::attempt::{AttemptState, BootstrapAttempt, BootstrapAttempts, BootstrapMode};
use super::client::BootstrapConnections;
use super::lazy::LazyAttempt;
use super::legacy::LegacyAttempt;
use crate::block_processor::BlockProcessor;
use crate::config::{BootstrapConfig, BootstrapConstants};
use crate::error::spawn_named;

pub struct BootstrapInitiator {
    config: BootstrapConfig,
    constants: BootstrapConstants,
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor>,
    connections: Arc<BootstrapConnections>,
    stats: Arc<Stats>,
    attempts: Arc<BootstrapAttempts>,
    /// Serializes starting attempts so at most one of each mode runs.
    starting: Mutex<()>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl BootstrapInitiator {
    pub fn new(
        config: BootstrapConfig,
        constants: BootstrapConstants,
        ledger: Arc<Ledger>,
        block_processor: Arc<BlockProcessor>,
        connections: Arc<BootstrapConnections>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            config,
            constants,
            ledger,
            block_processor,
            connections,
            stats,
            attempts: Arc::new(BootstrapAttempts::new()),
            starting: Mutex::new(()),
            threads: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn attempts(&self) -> &Arc<BootstrapAttempts> {
        &self.attempts
    }

    pub fn connections(&self) -> &Arc<BootstrapConnections> {
        &self.connections
    }

    /// Start a legacy attempt unless one is already running. With `force`
    /// the running attempt is stopped and replaced.
    pub fn bootstrap(&self, force: bool, id: Option<String>) -> bool {
        if self.config.disable_legacy || self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let _starting = self.starting.lock().unwrap();
        if let Some(current) = self.current_attempt() {
            if !force {
                return false;
            }
            current.stop();
        }
        let state = self.new_state(BootstrapMode::Legacy, id);
        tracing::info!(id = state.id, label = %state.label, "starting legacy bootstrap");
        let attempt = Arc::new(LegacyAttempt::new(
            state,
            Arc::clone(&self.ledger),
            Arc::clone(&self.block_processor),
            Arc::clone(&self.connections),
            self.config.clone(),
            self.constants.clone(),
            Arc::clone(&self.stats),
        ));
        self.stats.inc(StatType::Bootstrap, DetailType::Initiate);
        self.stats.inc(StatType::Bootstrap, DetailType::InitiateLegacy);
        self.launch(attempt)
    }

    /// Start pulling from `key`. A non-forced call feeds a running lazy
    /// attempt instead of starting a new one.
    pub fn bootstrap_lazy(&self, key: HashOrAccount, force: bool, id: Option<String>) -> bool {
        if self.config.disable_lazy || self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let _starting = self.starting.lock().unwrap();
        if let Some(current) = self.current_lazy_attempt() {
            if !force {
                return current.lazy_start(key);
            }
            current.stop();
        }
        let state = self.new_state(BootstrapMode::Lazy, id);
        tracing::info!(id = state.id, label = %state.label, start = %key, "starting lazy bootstrap");
        let attempt = Arc::new(LazyAttempt::new(
            state,
            Arc::clone(&self.ledger),
            Arc::clone(&self.block_processor),
            Arc::clone(&self.connections),
            self.config.clone(),
            self.constants.clone(),
            Arc::clone(&self.stats),
        ));
        attempt.lazy_start(key);
        self.stats.inc(StatType::Bootstrap, DetailType::Initiate);
        self.stats.inc(StatType::Bootstrap, DetailType::InitiateLazy);
        self.launch(attempt)
    }

    fn new_state(&self, mode: BootstrapMode, label: Option<String>) -> AttemptState {
        let id = self.attempts.next_id();
        let label = label.unwrap_or_else(|| format!("{}-{id}", mode.as_str()));
        AttemptState::new(id, label)
    }

    fn launch(&self, attempt: Arc<dyn BootstrapAttempt>) -> bool {
        self.attempts.add(Arc::clone(&attempt));
        let attempts = Arc::clone(&self.attempts);
        let connections = Arc::clone(&self.connections);
        let id = attempt.id();
        let spawned = spawn_named("bootstrap", move || {
            attempt.run();
            attempt.stop();
            attempts.remove(id);
            connections.clear_pulls(id);
        });
        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock().unwrap();
                threads.retain(|handle| !handle.is_finished());
                threads.push(handle);
                true
            }
            Err(error) => {
                tracing::error!(%error, "bootstrap attempt not started");
                self.attempts.remove(id);
                false
            }
        }
    }

    pub fn in_progress(&self) -> bool {
        self.attempts.size() > 0
    }

    pub fn current_attempt(&self) -> Option<Arc<dyn BootstrapAttempt>> {
        self.attempts.find_mode(BootstrapMode::Legacy)
    }

    pub fn current_lazy_attempt(&self) -> Option<Arc<dyn BootstrapAttempt>> {
        self.attempts.find_mode(BootstrapMode::Lazy)
    }

    /// Stop every running attempt but keep accepting new ones.
    pub fn stop_attempts(&self) {
        for attempt in self.attempts.list() {
            attempt.stop();
        }
    }

    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_attempts();
        self.connections.stop();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().unwrap().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use lattice_consensus::{OnlineReps, OnlineRepsConfig};
    use lattice_ledger::LedgerConstants;
    use lattice_network::Channel;
    use lattice_store::Store;
    use lattice_types::{BlockHash, NetworkId};

    use crate::bootstrap::client::BootstrapConnector;
    use crate::config::BlockProcessorConfig;
    use crate::gap_cache::GapCache;
    use crate::unchecked::UncheckedMap;

    /// No peers at all.
    struct Unreachable;

    impl BootstrapConnector for Unreachable {
        fn connect(&self) -> Option<Arc<dyn Channel>> {
            None
        }
    }

    fn initiator(config: BootstrapConfig) -> BootstrapInitiator {
        let stats = Arc::new(Stats::new());
        let ledger = Arc::new(
            Ledger::new(Arc::new(Store::new_memory()), LedgerConstants::dev(), Arc::clone(&stats)).unwrap(),
        );
        let online_reps = Arc::new(OnlineReps::new(Arc::clone(&ledger), OnlineRepsConfig::dev()));
        let gap_cache = Arc::new(GapCache::new(Arc::clone(&ledger), online_reps, Arc::clone(&stats), 1));
        let block_processor = Arc::new(BlockProcessor::new(
            BlockProcessorConfig::default(),
            Arc::clone(&ledger),
            Arc::new(UncheckedMap::new(1024, Arc::clone(&stats))),
            gap_cache,
            Arc::clone(&stats),
        ));
        let connections = Arc::new(BootstrapConnections::new(
            config.clone(),
            Arc::new(Unreachable),
            Arc::clone(&stats),
        ));
        BootstrapInitiator::new(
            config,
            BootstrapConstants::new(NetworkId::Dev),
            ledger,
            block_processor,
            connections,
            stats,
        )
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(30);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn disabled_modes_do_not_start() {
        let initiator = initiator(BootstrapConfig {
            disable_legacy: true,
            disable_lazy: true,
            ..BootstrapConfig::default()
        });
        assert!(!initiator.bootstrap(false, None));
        assert!(!initiator.bootstrap_lazy(BlockHash::new([1; 32]).into(), false, None));
        assert!(!initiator.in_progress());
    }

    #[test]
    fn lazy_keys_join_the_running_attempt() {
        let initiator = initiator(BootstrapConfig::default());
        let key = BlockHash::new([1; 32]).into();
        assert!(initiator.bootstrap_lazy(key, false, Some("manual".to_string())));
        let attempt = initiator.current_lazy_attempt().unwrap();
        assert_eq!(attempt.state().label, "manual");
        // Same key again is not new work; another key is.
        assert!(!initiator.bootstrap_lazy(key, false, None));
        assert!(initiator.bootstrap_lazy(BlockHash::new([2; 32]).into(), false, None));
        assert_eq!(initiator.attempts().total_attempts(), 1);
        initiator.stop();
        assert!(!initiator.in_progress());
    }

    #[test]
    fn attempts_without_peers_finish_and_unregister() {
        let initiator = initiator(BootstrapConfig::default());
        assert!(initiator.bootstrap(false, None));
        assert!(wait_until(|| !initiator.in_progress()));
        assert_eq!(
            initiator
                .stats
                .count(StatType::Bootstrap, DetailType::InitiateLegacy, lattice_utils::Direction::In),
            1
        );
        initiator.stop();
    }
}
