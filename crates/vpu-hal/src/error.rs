use thiserror::Error;

/// Failures reported by a [`crate::HardwareAccess`] implementation outside of
/// `run_operation` (which reports through [`crate::OpOutcome`] instead).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("clock enable failed: {0}")]
    Clock(String),

    #[error("interrupt line already requested")]
    IrqBusy,

    #[error("interrupt request failed: {0}")]
    Irq(String),

    /// The work-memory window could not be reserved.
    #[error("work memory unavailable: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
}
