//! Per-opcode instance state machine.
//!
//! Slots move `CLOSED -> OPEN` only through a successful INIT and back to `CLOSED` through
//! CLOSE, a timed-out command, or power down. No table lock is held across an engine command.

use vpu_hal::Opcode;

use crate::coordinator::Shared;
use crate::slots::SlotState;
use crate::task::{Request, TaskOutput, TaskResult};
use crate::TaskError;

pub(crate) struct Dispatcher<'a> {
    shared: &'a Shared,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    pub(crate) fn dispatch(&self, request: &Request) -> TaskResult {
        let index = request.instance;
        let Some(state) = self.shared.table.state(index) else {
            tracing::warn!(instance = index, opcode = %request.opcode, "instance index out of range");
            return Err(TaskError::InvalidInstance);
        };

        match request.opcode {
            Opcode::Init => self.init(request),
            Opcode::Close => self.close(request, state),
            opcode if state.closed || state.handle == 0 => {
                tracing::debug!(instance = index, %opcode, "command for closed instance");
                Err(TaskError::InvalidInstance)
            }
            _ => self.run(request, state.handle),
        }
    }

    fn record(&self, request: &Request) {
        let frame_len = request
            .opcode
            .carries_input()
            .then_some(request.args.input_len);
        self.shared
            .table
            .record(request.instance, request.opcode, frame_len);
    }

    fn init(&self, request: &Request) -> TaskResult {
        let index = request.instance;
        let shared = self.shared;

        // Provisional: the slot is closed with no region until the engine hands out a handle.
        if let Some(stale) = shared.table.begin_init(index) {
            tracing::debug!(instance = index, "re-initializing open instance");
            shared.regions.free(stale);
        }

        let Some(region) = shared.regions.alloc() else {
            tracing::warn!(instance = index, "no work region available for INIT");
            return Err(TaskError::ResourceExhausted);
        };

        self.record(request);
        let mut handle = 0;
        let result = shared
            .executor
            .execute(index, Opcode::Init, &mut handle, region.base, region.len);

        match result {
            Ok(_) if handle != 0 => {
                shared.table.commit_open(index, handle, region);
                shared.clear_force_closed();
                tracing::debug!(instance = index, handle, "instance opened");
                Ok(TaskOutput { value: handle })
            }
            Ok(_) => {
                shared.regions.free(region);
                tracing::warn!(instance = index, "INIT completed without an instance handle");
                Err(TaskError::HardwareReportedFailure { code: 0 })
            }
            Err(err) => {
                shared.regions.free(region);
                if err == TaskError::HardwareTimeout {
                    shared.table.log_diagnostics();
                }
                tracing::warn!(instance = index, error = %err, "INIT failed; instance left closed");
                Err(err)
            }
        }
    }

    fn close(&self, request: &Request, state: SlotState) -> TaskResult {
        let index = request.instance;
        if state.closed {
            tracing::debug!(instance = index, "CLOSE on closed instance");
            return Err(TaskError::AlreadyClosed);
        }

        self.record(request);
        let mut handle = state.handle;
        let result = self
            .shared
            .executor
            .execute(index, Opcode::Close, &mut handle, 0, 0);

        // Teardown is best effort: the slot is closed whatever the engine said.
        self.invalidate(index);

        match result {
            Ok(value) => {
                tracing::debug!(instance = index, "instance closed");
                Ok(TaskOutput { value })
            }
            Err(err) => {
                if err == TaskError::HardwareTimeout {
                    self.shared.table.log_diagnostics();
                }
                tracing::warn!(instance = index, error = %err, "CLOSE failed; instance closed anyway");
                Err(err)
            }
        }
    }

    fn run(&self, request: &Request, handle: u64) -> TaskResult {
        let index = request.instance;
        self.record(request);

        let mut handle = handle;
        let result = self.shared.executor.execute(
            index,
            request.opcode,
            &mut handle,
            request.args.param,
            request.args.input_len,
        );

        match result {
            Ok(value) => Ok(TaskOutput { value }),
            Err(TaskError::HardwareTimeout) => {
                self.shared.table.log_diagnostics();
                self.invalidate(index);
                tracing::warn!(
                    instance = index,
                    opcode = %request.opcode,
                    "instance invalidated after timeout"
                );
                Err(TaskError::HardwareTimeout)
            }
            Err(err) => Err(err),
        }
    }

    fn invalidate(&self, index: usize) {
        if let Some(region) = self.shared.table.mark_closed(index) {
            self.shared.regions.free(region);
        }
    }
}
