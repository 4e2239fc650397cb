use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use vpu_hal::Opcode;

use crate::TaskError;

pub type TaskId = u64;

/// Successful task output. The meaning of `value` depends on the opcode (allocated handle for
/// INIT, version for GET_VERSION, ring fill level, bytes consumed, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub value: u64,
}

pub type TaskResult = Result<TaskOutput, TaskError>;

/// Opcode arguments forwarded to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskArgs {
    /// Command specific parameter, passed as `arg1`.
    pub param: u64,
    /// Input bitstream length for DECODE_FRAME / FEED_RING_BUFFER, passed as `arg2`.
    pub input_len: u64,
}

/// One opcode invocation against one decoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub instance: usize,
    pub opcode: Opcode,
    pub args: TaskArgs,
}

impl Request {
    pub fn new(instance: usize, opcode: Opcode) -> Self {
        Self {
            instance,
            opcode,
            args: TaskArgs::default(),
        }
    }

    pub fn with_param(mut self, param: u64) -> Self {
        self.args.param = param;
        self
    }

    pub fn with_input_len(mut self, input_len: u64) -> Self {
        self.args.input_len = input_len;
        self
    }
}

/// Result slot plus completion flag shared by a [`Task`] and its [`Ticket`].
#[derive(Debug, Default)]
pub(crate) struct Completion {
    slot: Mutex<Option<TaskResult>>,
    done: Condvar,
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, Option<TaskResult>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the result and wake waiters. Only the first call has an effect.
    fn complete(&self, result: TaskResult) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        self.done.notify_all();
        true
    }

    fn peek(&self) -> Option<TaskResult> {
        *self.lock()
    }

    fn wait(&self) -> TaskResult {
        let mut slot = self.lock();
        loop {
            if let Some(result) = *slot {
                return result;
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(result) = *slot {
                return Some(result);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .done
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// A queued unit of work.
///
/// Owned by the command queue, then by the dispatcher while it executes. Dropping a task that
/// was never finished resolves its ticket with [`TaskError::InvalidInstance`], so a producer can
/// never be left waiting on a task that vanished.
pub struct Task {
    id: TaskId,
    request: Request,
    completion: Arc<Completion>,
}

impl Task {
    pub(crate) fn new(id: TaskId, request: Request) -> (Self, Ticket) {
        let completion = Arc::new(Completion::default());
        let ticket = Ticket {
            id,
            completion: Arc::clone(&completion),
        };
        (
            Self {
                id,
                request,
                completion,
            },
            ticket,
        )
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Deliver the terminal result and wake the producer.
    pub(crate) fn finish(self, result: TaskResult) {
        self.completion.complete(result);
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.completion.complete(Err(TaskError::InvalidInstance)) {
            tracing::debug!(
                task = self.id,
                instance = self.request.instance,
                opcode = %self.request.opcode,
                "task dropped before completion"
            );
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Producer-side handle for a submitted task.
#[derive(Debug, Clone)]
pub struct Ticket {
    id: TaskId,
    completion: Arc<Completion>,
}

impl Ticket {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_complete(&self) -> bool {
        self.completion.peek().is_some()
    }

    pub fn try_result(&self) -> Option<TaskResult> {
        self.completion.peek()
    }

    /// Block until the task has a result.
    ///
    /// Tasks are bounded by the interrupt timeout once dispatched, so this always returns.
    pub fn wait(&self) -> TaskResult {
        self.completion.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult> {
        self.completion.wait_timeout(timeout)
    }
}
