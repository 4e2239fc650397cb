//! Hardware access layer for the shared video-decode engine.
//!
//! This crate only describes the boundary between the decode coordinator and the physical
//! engine:
//! - [`HardwareAccess`] is the capability interface the coordinator is constructed with
//!   (register I/O, clocks, reset, interrupt line, work memory, and the opaque
//!   [`HardwareAccess::run_operation`] entry point),
//! - [`Opcode`] enumerates the engine commands, and
//! - [`regs`] holds the handful of register offsets the coordinator touches directly.
//!
//! [`SimulatedVpu`] is an in-process implementation used by tests and the `vpu-ctl` tool.
#![forbid(unsafe_code)]

pub mod access;
pub mod error;
pub mod opcode;
pub mod regs;
pub mod sim;

pub use access::{HardwareAccess, IrqHandler, OpOutcome};
pub use error::HalError;
pub use opcode::Opcode;
pub use regs::IrqStatus;
pub use sim::{OpRecord, SimulatedVpu};
