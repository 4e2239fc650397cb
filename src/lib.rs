//! Shared video-decode engine coordinator.
//!
//! Re-exports the hardware boundary ([`hal`]) and the scheduler built on it ([`coordinator`]).
#![forbid(unsafe_code)]

pub use vpu_coordinator as coordinator;
pub use vpu_hal as hal;

pub use vpu_coordinator::{
    AdminCommand, AdminReply, Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorStats,
    Request, SlotSnapshot, TaskError, TaskOutput, TaskResult, Ticket,
};
pub use vpu_hal::{HardwareAccess, Opcode, SimulatedVpu};
