use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vpu_hal::regs::{self, IrqStatus};
use vpu_hal::{HardwareAccess, OpOutcome, Opcode};

use crate::fault::FaultInjector;
use crate::monitor::InterruptMonitor;
use crate::TaskError;

/// Issues engine commands and confirms them against the completion interrupt.
///
/// Only the dispatcher thread calls [`HardwareExecutor::execute`], so at most one command is in
/// flight on the engine.
pub struct HardwareExecutor {
    hal: Arc<dyn HardwareAccess>,
    monitor: Arc<InterruptMonitor>,
    faults: FaultInjector,
    irq_timeout: Duration,
    needs_reset: AtomicBool,
    timeouts: AtomicU64,
}

impl fmt::Debug for HardwareExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareExecutor")
            .field("irq_timeout", &self.irq_timeout)
            .field("needs_reset", &self.needs_reset())
            .field("timeouts", &self.timeouts())
            .finish_non_exhaustive()
    }
}

impl HardwareExecutor {
    pub fn new(hal: Arc<dyn HardwareAccess>, irq_timeout: Duration) -> Self {
        Self {
            hal,
            monitor: Arc::new(InterruptMonitor::new()),
            faults: FaultInjector::default(),
            irq_timeout,
            needs_reset: AtomicBool::new(false),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn hal(&self) -> &Arc<dyn HardwareAccess> {
        &self.hal
    }

    pub fn monitor(&self) -> &Arc<InterruptMonitor> {
        &self.monitor
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Whether a command timed out since the engine was last reset.
    pub fn needs_reset(&self) -> bool {
        self.needs_reset.load(Ordering::Acquire)
    }

    pub(crate) fn clear_needs_reset(&self) {
        self.needs_reset.store(false, Ordering::Release);
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Acquire)
    }

    /// Run `opcode` for `instance`, returning the engine's output value.
    pub fn execute(
        &self,
        instance: usize,
        opcode: Opcode,
        handle: &mut u64,
        arg1: u64,
        arg2: u64,
    ) -> Result<u64, TaskError> {
        let confirm = opcode.requires_confirmation();
        let frame_len = opcode.carries_input().then_some(arg2);
        self.monitor.arm(opcode, confirm, frame_len);

        tracing::trace!(instance, %opcode, handle = *handle, arg1, arg2, "issuing command");
        let outcome = self.hal.run_operation(opcode, handle, arg1, arg2);

        if confirm {
            let injected = self.faults.should_inject(opcode);
            if injected || !self.monitor.wait(self.irq_timeout) {
                self.report_timeout(instance, opcode, injected);
                return Err(TaskError::HardwareTimeout);
            }
            self.monitor.acknowledge();
            self.hal.write_reg(regs::INT_CLEAR, IrqStatus::all().bits());
        }

        match outcome {
            OpOutcome::Done { value } => Ok(value),
            OpOutcome::Failed { code } => {
                tracing::warn!(instance, %opcode, code, "engine reported failure");
                Err(TaskError::HardwareReportedFailure { code })
            }
        }
    }

    fn report_timeout(&self, instance: usize, opcode: Opcode, injected: bool) {
        self.timeouts.fetch_add(1, Ordering::AcqRel);
        self.needs_reset.store(true, Ordering::Release);

        let diag = self.monitor.diagnostics();
        tracing::error!(
            instance,
            %opcode,
            injected,
            timeout_ms = self.irq_timeout.as_millis() as u64,
            last_frame_len = diag.last_frame_len,
            int_status = self.hal.read_reg(regs::INT_STATUS),
            busy = self.hal.read_reg(regs::BUSY),
            "completion interrupt timed out; dumping engine state"
        );
        self.hal.dump_state();
    }
}
