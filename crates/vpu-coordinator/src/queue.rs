use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::task::{Task, TaskId};

/// Global FIFO of pending tasks.
///
/// Any number of producers may [`CommandQueue::enqueue`]; only the dispatcher (and the
/// lifecycle manager during teardown) takes tasks out.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<VecDeque<Task>>,
    wake: Condvar,
    pending: AtomicUsize,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, task: Task) {
        let mut queue = self.lock();
        queue.push_back(task);
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.wake.notify_one();
    }

    pub fn dequeue_front(&self) -> Option<Task> {
        let mut queue = self.lock();
        let task = queue.pop_front()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(task)
    }

    /// Take a specific task out of the queue. Unknown ids are ignored.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let mut queue = self.lock();
        let Some(pos) = queue.iter().position(|task| task.id() == id) else {
            tracing::debug!(task = id, "remove of task not in queue");
            return None;
        };
        let task = queue.remove(pos)?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(task)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the queue to become non-empty.
    ///
    /// Returns whether a task is available. Spurious or shutdown wakeups return `false`.
    pub fn wait_nonempty(&self, timeout: Duration) -> bool {
        let queue = self.lock();
        if !queue.is_empty() {
            return true;
        }
        let (queue, _) = self
            .wake
            .wait_timeout(queue, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        !queue.is_empty()
    }

    /// Wake every waiter without enqueueing anything.
    pub fn wake_all(&self) {
        let _queue = self.lock();
        self.wake.notify_all();
    }

    pub fn drain(&self) -> Vec<Task> {
        let mut queue = self.lock();
        let drained: Vec<Task> = queue.drain(..).collect();
        self.pending.fetch_sub(drained.len(), Ordering::AcqRel);
        drained
    }
}
