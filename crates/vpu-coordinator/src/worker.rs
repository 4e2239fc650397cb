//! The single dispatcher thread.
//!
//! All engine commands are issued from here, one task at a time, in queue order.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::coordinator::Shared;
use crate::dispatch::Dispatcher;
use crate::task::Task;
use crate::TaskError;

pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("vpu-dispatch".into())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    tracing::debug!("dispatcher started");
    let idle_poll = shared.config.idle_poll();
    while !shared.is_stopping() {
        // Bounded so a missed wakeup costs at most one poll period.
        if !shared.queue.wait_nonempty(idle_poll) {
            continue;
        }
        let Some(task) = shared.queue.dequeue_front() else {
            continue;
        };
        execute(shared, task);
    }
    tracing::debug!("dispatcher stopped");
}

fn execute(shared: &Shared, task: Task) {
    let _gate = shared.engine_gate();
    let request = *task.request();

    if !shared.engine_available() {
        shared.stats.discarded();
        tracing::warn!(
            task = task.id(),
            instance = request.instance,
            opcode = %request.opcode,
            "engine not open; rejecting task"
        );
        task.finish(Err(TaskError::InvalidInstance));
        return;
    }

    let result = Dispatcher::new(shared).dispatch(&request);
    shared.stats.executed(&result);
    if let Err(err) = result {
        tracing::debug!(
            task = task.id(),
            instance = request.instance,
            opcode = %request.opcode,
            error = %err,
            "task failed"
        );
    }
    task.finish(result);
}
