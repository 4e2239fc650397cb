use std::sync::Arc;

use crate::{HalError, Opcode};

/// Callback invoked from the engine's interrupt context.
///
/// Handlers must do nothing beyond recording the event and waking a waiter.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Result of one [`HardwareAccess::run_operation`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// The engine accepted the command. `value` is command specific (version number, ring
    /// fill level, bytes consumed, ...).
    Done { value: u64 },
    /// The engine rejected the command with a non-zero exit code.
    Failed { code: i32 },
}

impl OpOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, OpOutcome::Done { .. })
    }
}

/// Capability interface over the physical decode engine.
///
/// All methods take `&self`: the coordinator shares one implementation between its worker
/// thread and the power lifecycle, and serializes hardware commands itself. Implementations
/// use interior mutability for their own bookkeeping.
///
/// Implemented by:
/// - a platform driver backed by real MMIO/clock/reset frameworks,
/// - [`crate::SimulatedVpu`] for tests and tooling, or
/// - a recording wrapper around either.
pub trait HardwareAccess: Send + Sync {
    fn read_reg(&self, offset: u32) -> u32;
    fn write_reg(&self, offset: u32, value: u32);

    /// Take one vote on the engine clock.
    fn enable_clocks(&self) -> Result<(), HalError>;
    /// Drop one vote on the engine clock.
    fn disable_clocks(&self);

    fn assert_reset(&self);
    fn deassert_reset(&self);

    /// Install the completion interrupt handler. The line stays masked until
    /// [`HardwareAccess::enable_irq`].
    fn request_irq(&self, handler: IrqHandler) -> Result<(), HalError>;
    fn free_irq(&self);
    fn enable_irq(&self);
    fn disable_irq(&self);

    /// Log the complete engine state. Called after a command times out.
    fn dump_state(&self);

    /// Reserve the engine's work-memory window, returning its base address.
    fn reserve_work_memory(&self, bytes: u64) -> Result<u64, HalError>;
    fn release_work_memory(&self, base: u64);

    /// Issue one engine command.
    ///
    /// `handle` is the instance handle; `Opcode::Init` writes the newly allocated handle
    /// through it and `Opcode::Close` is expected to leave it untouched.
    fn run_operation(&self, opcode: Opcode, handle: &mut u64, arg1: u64, arg2: u64) -> OpOutcome;
}
