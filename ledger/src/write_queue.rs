//! FIFO of store writers.
//!
//! The store allows one write transaction at a time. Writers announce
//! themselves here first so batch processing, cementing and pruning take
//! turns in arrival order instead of racing for the engine lock.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Writer {
    ConfirmationHeight,
    ProcessBatch,
    Pruning,
    VotingFinal,
    Testing,
}

struct QueueData {
    queue: Mutex<VecDeque<Writer>>,
    condition: Condvar,
}

impl QueueData {
    fn release(&self) {
        self.queue.lock().unwrap().pop_front();
        self.condition.notify_all();
    }
}

/// Holds the head of the queue. Dropping it lets the next writer in.
pub struct WriteGuard {
    data: Option<Arc<QueueData>>,
}

impl WriteGuard {
    pub fn release(&mut self) {
        if let Some(data) = self.data.take() {
            data.release();
        }
    }

    pub fn is_owned(&self) -> bool {
        self.data.is_some()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct WriteQueue {
    data: Arc<QueueData>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            data: Arc::new(QueueData {
                queue: Mutex::new(VecDeque::new()),
                condition: Condvar::new(),
            }),
        }
    }

    /// Block until `writer` reaches the head of the queue.
    pub fn wait(&self, writer: Writer) -> WriteGuard {
        let mut queue = self.data.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        let _queue = self
            .data
            .condition
            .wait_while(queue, |q| q.front() != Some(&writer))
            .unwrap();
        self.guard()
    }

    /// Enqueue `writer` if needed; true when it is at the head.
    pub fn process(&self, writer: Writer) -> bool {
        let mut queue = self.data.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        queue.front() == Some(&writer)
    }

    pub fn try_lock(&self, writer: Writer) -> Option<WriteGuard> {
        self.process(writer).then(|| self.guard())
    }

    pub fn contains(&self, writer: Writer) -> bool {
        self.data.queue.lock().unwrap().contains(&writer)
    }

    fn guard(&self) -> WriteGuard {
        WriteGuard {
            data: Some(Arc::clone(&self.data)),
        }
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_writer_waits_for_first() {
        let queue = Arc::new(WriteQueue::new());
        let guard = queue.wait(Writer::ProcessBatch);
        assert!(queue.try_lock(Writer::ConfirmationHeight).is_none());
        assert!(queue.contains(Writer::ConfirmationHeight));

        let q = Arc::clone(&queue);
        let waiter = thread::spawn(move || {
            let _g = q.wait(Writer::ConfirmationHeight);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.join().unwrap();
        assert!(!queue.contains(Writer::ConfirmationHeight));
    }

    #[test]
    fn released_guard_is_not_owned() {
        let queue = WriteQueue::new();
        let mut guard = queue.wait(Writer::Testing);
        assert!(guard.is_owned());
        guard.release();
        assert!(!guard.is_owned());
        assert!(queue.try_lock(Writer::Pruning).is_some());
    }
}
