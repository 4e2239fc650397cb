use thiserror::Error;
use vpu_hal::HalError;

/// Terminal failure of a single task.
///
/// Every submitted task resolves to exactly one `Ok` output or one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The command targeted a closed or out-of-range instance, or no session was open.
    #[error("decoder instance is not open")]
    InvalidInstance,

    /// The engine did not raise its completion interrupt within the bound.
    #[error("engine did not signal completion in time")]
    HardwareTimeout,

    /// The engine completed the command with a non-zero exit code.
    ///
    /// `code == 0` means INIT reported success without allocating an instance.
    #[error("engine reported failure (code {code})")]
    HardwareReportedFailure { code: i32 },

    #[error("no work memory available for the instance")]
    ResourceExhausted,

    #[error("decoder instance already closed")]
    AlreadyClosed,
}

/// Errors surfaced by the coordinator's lifecycle and control operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("work memory exhausted: {0}")]
    ResourceExhausted(#[source] HalError),

    #[error("close without an open session")]
    NoOpenSession,

    #[error("engine is suspended")]
    Suspended,

    #[error("slot index {0} out of range")]
    InvalidSlot(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("coordinator is shut down")]
    ShutDown,

    #[error("failed to start dispatcher thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Hal(#[from] HalError),
}
