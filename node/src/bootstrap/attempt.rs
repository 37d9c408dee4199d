//! Bootstrap attempts and their registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use lattice_types::{Block, HashOrAccount};

use super::pull::PullInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BootstrapMode {
    Legacy,
    Lazy,
}

impl BootstrapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapMode::Legacy => "legacy",
            BootstrapMode::Lazy => "lazy",
        }
    }
}

/// One bootstrap session. Each runs on its own thread until its work is
/// done or it is stopped.
pub trait BootstrapAttempt: Send + Sync {
    fn state(&self) -> &AttemptState;

    fn mode(&self) -> BootstrapMode;

    fn run(&self);

    /// Handle one pulled block. Returns true to abandon the current pull.
    fn process_block(&self, block: Block, pull: &PullInfo) -> bool;

    fn pull_finished(&self, _pull: &PullInfo) {}

    /// Add a lazy target to a running attempt.
    fn lazy_start(&self, _key: HashOrAccount) -> bool {
        false
    }

    fn id(&self) -> u64 {
        self.state().id
    }

    fn stopped(&self) -> bool {
        self.state().stopped()
    }

    fn stop(&self) {
        self.state().stop();
    }

    fn total_blocks(&self) -> u64 {
        self.state().total_blocks.load(Ordering::SeqCst)
    }
}

/// Bookkeeping shared by every attempt kind.
pub struct AttemptState {
    pub id: u64,
    pub label: String,
    pub started: Instant,
    stopped: AtomicBool,
    pub total_blocks: AtomicU64,
    wake: Mutex<()>,
    condition: Condvar,
}

impl AttemptState {
    pub fn new(id: u64, label: String) -> Self {
        Self {
            id,
            label,
            started: Instant::now(),
            stopped: AtomicBool::new(false),
            total_blocks: AtomicU64::new(0),
            wake: Mutex::new(()),
            condition: Condvar::new(),
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _guard = self.wake.lock().unwrap();
        self.condition.notify_all();
    }

    /// Sleep for up to `timeout`, returning early on stop or notify.
    pub fn wait(&self, timeout: Duration) {
        let guard = self.wake.lock().unwrap();
        if self.stopped() {
            return;
        }
        let _ = self.condition.wait_timeout(guard, timeout).unwrap();
    }

    pub fn notify(&self) {
        let _guard = self.wake.lock().unwrap();
        self.condition.notify_all();
    }
}

#[derive(Default)]
struct Registry {
    incremental: u64,
    attempts: HashMap<u64, Arc<dyn BootstrapAttempt>>,
}

/// Running attempts by id.
#[derive(Default)]
pub struct BootstrapAttempts {
    registry: Mutex<Registry>,
}

impl BootstrapAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.incremental;
        registry.incremental += 1;
        id
    }

    pub fn add(&self, attempt: Arc<dyn BootstrapAttempt>) {
        self.registry
            .lock()
            .unwrap()
            .attempts
            .insert(attempt.id(), attempt);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<dyn BootstrapAttempt>> {
        self.registry.lock().unwrap().attempts.remove(&id)
    }

    pub fn find(&self, id: u64) -> Option<Arc<dyn BootstrapAttempt>> {
        self.registry.lock().unwrap().attempts.get(&id).cloned()
    }

    pub fn find_mode(&self, mode: BootstrapMode) -> Option<Arc<dyn BootstrapAttempt>> {
        self.registry
            .lock()
            .unwrap()
            .attempts
            .values()
            .find(|a| a.mode() == mode)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<dyn BootstrapAttempt>> {
        self.registry.lock().unwrap().attempts.values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.registry.lock().unwrap().attempts.len()
    }

    /// Attempts ever started.
    pub fn total_attempts(&self) -> u64 {
        self.registry.lock().unwrap().incremental
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle(AttemptState, BootstrapMode);

    impl BootstrapAttempt for Idle {
        fn state(&self) -> &AttemptState {
            &self.0
        }
        fn mode(&self) -> BootstrapMode {
            self.1
        }
        fn run(&self) {}
        fn process_block(&self, _block: Block, _pull: &PullInfo) -> bool {
            false
        }
    }

    #[test]
    fn registry_tracks_ids_and_modes() {
        let attempts = BootstrapAttempts::new();
        let first = attempts.next_id();
        let second = attempts.next_id();
        assert_ne!(first, second);
        attempts.add(Arc::new(Idle(AttemptState::new(first, "a".into()), BootstrapMode::Legacy)));
        attempts.add(Arc::new(Idle(AttemptState::new(second, "b".into()), BootstrapMode::Lazy)));

        assert_eq!(attempts.size(), 2);
        assert_eq!(attempts.total_attempts(), 2);
        assert_eq!(attempts.find_mode(BootstrapMode::Lazy).map(|a| a.id()), Some(second));
        attempts.remove(first);
        assert!(attempts.find(first).is_none());
        assert_eq!(attempts.total_attempts(), 2);
    }

    #[test]
    fn stop_wakes_waiters() {
        let state = Arc::new(AttemptState::new(0, String::new()));
        let waiter = Arc::clone(&state);
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            waiter.wait(Duration::from_secs(30));
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(20));
        state.stop();
        assert!(handle.join().unwrap() < Duration::from_secs(30));
        assert!(state.stopped());
    }
}
