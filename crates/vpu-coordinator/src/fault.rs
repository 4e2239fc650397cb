//! Runtime fault injection for the timeout recovery path.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use vpu_hal::Opcode;

/// Decides whether a confirmed command should be treated as timed out even if its interrupt
/// arrives.
pub trait FaultPolicy: Send + Sync + fmt::Debug {
    fn inject_timeout(&self, opcode: Opcode) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultPolicy for NoFaults {
    fn inject_timeout(&self, _opcode: Opcode) -> bool {
        false
    }
}

/// Time out every `period`-th matching command (`opcode == None` matches everything).
#[derive(Debug)]
pub struct TimeoutEvery {
    opcode: Option<Opcode>,
    period: u32,
    seen: AtomicU32,
}

impl TimeoutEvery {
    pub fn new(opcode: Option<Opcode>, period: u32) -> Self {
        Self {
            opcode,
            period: period.max(1),
            seen: AtomicU32::new(0),
        }
    }
}

impl FaultPolicy for TimeoutEvery {
    fn inject_timeout(&self, opcode: Opcode) -> bool {
        if self.opcode.is_some_and(|op| op != opcode) {
            return false;
        }
        let seen = self.seen.fetch_add(1, Ordering::AcqRel) + 1;
        seen % self.period == 0
    }
}

/// Time out the next `count` matching commands, then behave normally.
#[derive(Debug)]
pub struct TimeoutNext {
    opcode: Option<Opcode>,
    remaining: AtomicU32,
}

impl TimeoutNext {
    pub fn new(opcode: Option<Opcode>, count: u32) -> Self {
        Self {
            opcode,
            remaining: AtomicU32::new(count),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}

impl FaultPolicy for TimeoutNext {
    fn inject_timeout(&self, opcode: Opcode) -> bool {
        if self.opcode.is_some_and(|op| op != opcode) {
            return false;
        }
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Swappable holder for the active [`FaultPolicy`].
#[derive(Debug)]
pub struct FaultInjector {
    policy: RwLock<Arc<dyn FaultPolicy>>,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self {
            policy: RwLock::new(Arc::new(NoFaults)),
        }
    }
}

impl FaultInjector {
    pub fn set(&self, policy: Arc<dyn FaultPolicy>) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn clear(&self) {
        self.set(Arc::new(NoFaults));
    }

    pub fn should_inject(&self, opcode: Opcode) -> bool {
        let policy = self
            .policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        policy.inject_timeout(opcode)
    }
}
