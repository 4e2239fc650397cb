#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use tracing_subscriber::EnvFilter;
use vpu::hal::{HalError, IrqHandler, OpOutcome};
use vpu::{Coordinator, CoordinatorConfig, HardwareAccess, Opcode, SimulatedVpu};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn config(slot_count: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        slot_count,
        idle_poll_ms: 5,
        irq_timeout_ms: 50,
        force_close_timeout_ms: 150,
        ..Default::default()
    }
}

/// Power-sequencing call seen by [`TracingHal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    ClockOn,
    ClockOff,
    ResetAssert,
    ResetDeassert,
    IrqRequest,
    IrqFree,
    MemoryReserve,
    MemoryRelease,
}

/// Wraps a [`SimulatedVpu`] and records the power sequencing the coordinator performs.
pub struct TracingHal {
    pub inner: Arc<SimulatedVpu>,
    events: Mutex<Vec<PowerEvent>>,
    clock_failures: AtomicU32,
}

impl TracingHal {
    pub fn new(inner: Arc<SimulatedVpu>) -> Self {
        Self {
            inner,
            events: Mutex::new(Vec::new()),
            clock_failures: AtomicU32::new(0),
        }
    }

    pub fn events(&self) -> Vec<PowerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Make the next `count` clock enables fail.
    pub fn fail_clock_enables(&self, count: u32) {
        self.clock_failures.store(count, Ordering::SeqCst);
    }

    fn push(&self, event: PowerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl HardwareAccess for TracingHal {
    fn read_reg(&self, offset: u32) -> u32 {
        self.inner.read_reg(offset)
    }

    fn write_reg(&self, offset: u32, value: u32) {
        self.inner.write_reg(offset, value)
    }

    fn enable_clocks(&self) -> Result<(), HalError> {
        let failing = self
            .clock_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HalError::Clock("injected clock failure".into()));
        }
        self.push(PowerEvent::ClockOn);
        self.inner.enable_clocks()
    }

    fn disable_clocks(&self) {
        self.push(PowerEvent::ClockOff);
        self.inner.disable_clocks()
    }

    fn assert_reset(&self) {
        self.push(PowerEvent::ResetAssert);
        self.inner.assert_reset()
    }

    fn deassert_reset(&self) {
        self.push(PowerEvent::ResetDeassert);
        self.inner.deassert_reset()
    }

    fn request_irq(&self, handler: IrqHandler) -> Result<(), HalError> {
        self.push(PowerEvent::IrqRequest);
        self.inner.request_irq(handler)
    }

    fn free_irq(&self) {
        self.push(PowerEvent::IrqFree);
        self.inner.free_irq()
    }

    fn enable_irq(&self) {
        self.inner.enable_irq()
    }

    fn disable_irq(&self) {
        self.inner.disable_irq()
    }

    fn dump_state(&self) {
        self.inner.dump_state()
    }

    fn reserve_work_memory(&self, bytes: u64) -> Result<u64, HalError> {
        self.push(PowerEvent::MemoryReserve);
        self.inner.reserve_work_memory(bytes)
    }

    fn release_work_memory(&self, base: u64) {
        self.push(PowerEvent::MemoryRelease);
        self.inner.release_work_memory(base)
    }

    fn run_operation(&self, opcode: Opcode, handle: &mut u64, arg1: u64, arg2: u64) -> OpOutcome {
        self.inner.run_operation(opcode, handle, arg1, arg2)
    }
}

pub struct Rig {
    pub sim: Arc<SimulatedVpu>,
    pub hal: Arc<TracingHal>,
    pub coord: Arc<Coordinator>,
}

pub fn rig(slot_count: usize) -> Rig {
    init_tracing();
    let sim = Arc::new(SimulatedVpu::new());
    let hal = Arc::new(TracingHal::new(Arc::clone(&sim)));
    let dyn_hal: Arc<dyn HardwareAccess> = hal.clone();
    let coord = Arc::new(Coordinator::new(dyn_hal, config(slot_count)).expect("valid config"));
    Rig { sim, hal, coord }
}
