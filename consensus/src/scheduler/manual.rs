//! Elections requested explicitly by an operator.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use lattice_types::Block;
use lattice_utils::{DetailType, StatType, Stats};

use crate::active_elections::ActiveElections;
use crate::election::ElectionBehavior;
use crate::error::{spawn_named, ConsensusError};

#[derive(Default)]
struct Queue {
    stopped: bool,
    blocks: VecDeque<Block>,
}

pub struct ManualScheduler {
    active: Arc<ActiveElections>,
    stats: Arc<Stats>,
    queue: Mutex<Queue>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ManualScheduler {
    pub fn new(active: Arc<ActiveElections>, stats: Arc<Stats>) -> Self {
        Self {
            active,
            stats,
            queue: Mutex::new(Queue::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let scheduler = Arc::clone(self);
        let handle = spawn_named("sched manual", move || scheduler.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.queue.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn push(&self, block: Block) {
        self.queue.lock().unwrap().blocks.push_back(block);
        self.condition.notify_all();
    }

    fn run(&self) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            queue = self
                .condition
                .wait_while(queue, |q| !q.stopped && q.blocks.is_empty())
                .unwrap();
            if queue.stopped {
                return;
            }
            let Some(block) = queue.blocks.pop_front() else {
                continue;
            };
            drop(queue);
            if self.active.insert(&block, ElectionBehavior::Manual).0 {
                self.stats.inc(StatType::ElectionScheduler, DetailType::Manual);
            }
            queue = self.queue.lock().unwrap();
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::consensus;
    use lattice_types::{Account, Amount};
    use std::time::{Duration, Instant};

    #[test]
    fn pushed_blocks_become_manual_elections() {
        let mut fixture = consensus(&[]);
        let scheduler = Arc::new(ManualScheduler::new(
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.stats),
        ));
        scheduler.start().unwrap();
        let block = fixture.builder.genesis().send(Account::new([5; 32]), Amount::raw(1));
        scheduler.push(block.clone());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !fixture.active.active_hash(&block.hash()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();
        let election = fixture.active.election_for_hash(&block.hash()).unwrap();
        assert_eq!(election.behavior(), ElectionBehavior::Manual);
    }
}
