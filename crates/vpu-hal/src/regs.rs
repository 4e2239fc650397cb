//! Register offsets the coordinator touches directly.
//!
//! Everything else about the engine's register file is private to the hardware access layer.

use bitflags::bitflags;

/// Read-only product/firmware version.
pub const VERSION: u32 = 0x0000;
/// Latched interrupt causes (see [`IrqStatus`]).
pub const INT_STATUS: u32 = 0x0004;
/// Write-1-to-clear companion of [`INT_STATUS`].
pub const INT_CLEAR: u32 = 0x0008;
/// Non-zero while a command is executing.
pub const BUSY: u32 = 0x000C;
/// Last command number written by `run_operation`.
pub const COMMAND: u32 = 0x0010;
/// Handle of the instance the last command targeted (low 32 bits).
pub const INSTANCE: u32 = 0x0014;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct IrqStatus: u32 {
        const COMMAND_DONE = 1 << 0;
        const BUFFER_EMPTY = 1 << 1;
        const ERROR = 1 << 2;
    }
}
