//! Command scheduler and instance coordinator for a shared video-decode engine.
//!
//! The engine executes one command at a time. Any number of client threads submit
//! [`Request`]s through a [`Coordinator`]; a single dispatcher thread takes them off a FIFO
//! [`CommandQueue`], runs each through the per-instance state machine, waits for the engine's
//! completion interrupt where the opcode requires one, and resolves the submitter's [`Ticket`].
//!
//! Power is reference counted across client sessions: the engine is clocked, out of reset and
//! holding its interrupt line exactly while at least one session is open.
#![forbid(unsafe_code)]

pub mod admin;
pub mod config;
mod coordinator;
mod dispatch;
pub mod error;
pub mod executor;
pub mod fault;
pub mod monitor;
pub mod queue;
pub mod regions;
pub mod slots;
mod stats;
pub mod task;
mod worker;

pub use admin::{AdminCommand, AdminReply};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, TaskError};
pub use executor::HardwareExecutor;
pub use fault::{FaultInjector, FaultPolicy, NoFaults, TimeoutEvery, TimeoutNext};
pub use monitor::{InterruptMonitor, MonitorDiagnostics};
pub use queue::CommandQueue;
pub use regions::{Region, RegionAllocator};
pub use slots::{InstanceTable, SlotSnapshot};
pub use stats::CoordinatorStats;
pub use task::{Request, Task, TaskArgs, TaskId, TaskOutput, TaskResult, Ticket};

pub use vpu_hal::Opcode;
