//! Completion-interrupt tracking.
//!
//! The engine's interrupt handler does nothing but bump a counter and wake the dispatcher;
//! the dispatcher arms the counter before issuing a confirmed command and then waits on it
//! with a bound.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use vpu_hal::{IrqHandler, Opcode};

/// Monitor state kept for the timeout dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorDiagnostics {
    pub current_opcode: Option<Opcode>,
    pub confirmation_required: bool,
    pub last_frame_len: u64,
}

#[derive(Debug, Default)]
pub struct InterruptMonitor {
    pending: AtomicU32,
    lock: Mutex<()>,
    arrived: Condvar,
    diagnostics: Mutex<MonitorDiagnostics>,
}

impl InterruptMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handler to install on the engine's interrupt line.
    pub fn irq_handler(self: &Arc<Self>) -> IrqHandler {
        let monitor = Arc::clone(self);
        Arc::new(move || monitor.notify())
    }

    /// Record one interrupt. This is the only work done in interrupt context.
    pub fn notify(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let _guard = self.lock();
        self.arrived.notify_all();
    }

    /// Prepare for a command: reset the counter and record what is about to run.
    pub fn arm(&self, opcode: Opcode, confirmation_required: bool, frame_len: Option<u64>) {
        {
            let mut diag = self
                .diagnostics
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            diag.current_opcode = Some(opcode);
            diag.confirmation_required = confirmation_required;
            if let Some(len) = frame_len {
                diag.last_frame_len = len;
            }
        }
        if confirmation_required {
            self.pending.store(0, Ordering::Release);
        }
    }

    /// Wait until at least one interrupt has arrived since the last [`InterruptMonitor::arm`].
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if self.pending.load(Ordering::Acquire) > 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .arrived
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Consume all pending interrupts, returning how many there were.
    pub fn acknowledge(&self) -> u32 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn diagnostics(&self) -> MonitorDiagnostics {
        *self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget diagnostics from a previous power cycle.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::Release);
        *self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = MonitorDiagnostics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_immediately_when_interrupt_already_arrived() {
        let monitor = InterruptMonitor::new();
        monitor.arm(Opcode::DecodeFrame, true, Some(100));
        monitor.notify();
        assert!(monitor.wait(Duration::from_millis(1)));
        assert_eq!(monitor.acknowledge(), 1);
        assert_eq!(monitor.pending(), 0);
    }

    #[test]
    fn arm_discards_stale_interrupts() {
        let monitor = InterruptMonitor::new();
        monitor.notify();
        monitor.notify();
        monitor.arm(Opcode::Init, true, None);
        assert!(!monitor.wait(Duration::from_millis(10)));
    }

    #[test]
    fn handler_wakes_waiter_from_another_thread() {
        let monitor = Arc::new(InterruptMonitor::new());
        monitor.arm(Opcode::Close, true, None);
        let handler = monitor.irq_handler();
        let irq = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handler();
        });
        assert!(monitor.wait(Duration::from_secs(5)));
        irq.join().unwrap();
    }

    #[test]
    fn diagnostics_track_current_command() {
        let monitor = InterruptMonitor::new();
        monitor.arm(Opcode::DecodeFrame, true, Some(4096));
        monitor.arm(Opcode::GetVersion, false, None);
        assert_eq!(
            monitor.diagnostics(),
            MonitorDiagnostics {
                current_opcode: Some(Opcode::GetVersion),
                confirmation_required: false,
                last_frame_len: 4096,
            }
        );
        monitor.reset();
        assert_eq!(monitor.diagnostics(), MonitorDiagnostics::default());
    }
}
