//! In-process stand-in for the decode engine.
//!
//! `SimulatedVpu` keeps just enough state to make the coordinator's contracts observable:
//! clock votes, reset line, interrupt line, a register file, live instance handles and a log of
//! every command issued. Tests script failures through the `fail_next`/`suppress_irqs` knobs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::regs::{self, IrqStatus};
use crate::{HalError, HardwareAccess, IrqHandler, OpOutcome, Opcode};

/// Exit code for commands issued while the engine is unclocked or held in reset.
pub const ERR_NOT_POWERED: i32 = -19;
/// Exit code for commands against a handle the engine does not know.
pub const ERR_BAD_HANDLE: i32 = -22;

/// Value of the [`regs::VERSION`] register.
pub const SIM_VERSION: u32 = 0x0002_0104;

const DEFAULT_MEMORY_WINDOW_BYTES: u64 = 64 << 20;
const WORK_MEMORY_BASE: u64 = 0x8000_0000;
const HANDLE_BASE: u64 = 0x1000;
const HANDLE_STRIDE: u64 = 0x100;

/// One command as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpRecord {
    pub opcode: Opcode,
    pub handle: u64,
    pub arg1: u64,
    pub arg2: u64,
}

struct SimState {
    regs: BTreeMap<u32, u32>,
    clock_votes: u32,
    in_reset: bool,
    reset_releases: u32,
    irq_handler: Option<IrqHandler>,
    irq_enabled: bool,
    dumps: u32,
    memory_window_bytes: u64,
    reserved_bytes: Option<u64>,
    next_handle: u64,
    live_handles: BTreeSet<u64>,
    ring_fill: u64,
    log: Vec<OpRecord>,
    scripted_failures: VecDeque<(Opcode, i32)>,
    suppressed_irqs: BTreeMap<Opcode, u32>,
    zero_handle_inits: u32,
    irq_latency: Option<Duration>,
}

impl SimState {
    fn powered(&self) -> bool {
        self.clock_votes > 0 && !self.in_reset
    }

    fn execute(&mut self, opcode: Opcode, handle: &mut u64, arg2: u64) -> OpOutcome {
        if !self.powered() {
            return OpOutcome::Failed {
                code: ERR_NOT_POWERED,
            };
        }

        if let Some(pos) = self
            .scripted_failures
            .iter()
            .position(|(op, _)| *op == opcode)
        {
            if let Some((_, code)) = self.scripted_failures.remove(pos) {
                return OpOutcome::Failed { code };
            }
        }

        match opcode {
            Opcode::Init => {
                if self.zero_handle_inits > 0 {
                    self.zero_handle_inits -= 1;
                    *handle = 0;
                    return OpOutcome::Done { value: 0 };
                }
                let allocated = self.next_handle;
                self.next_handle += HANDLE_STRIDE;
                self.live_handles.insert(allocated);
                *handle = allocated;
                OpOutcome::Done { value: allocated }
            }
            Opcode::Close => {
                if self.live_handles.remove(&*handle) {
                    OpOutcome::Done { value: 0 }
                } else {
                    OpOutcome::Failed {
                        code: ERR_BAD_HANDLE,
                    }
                }
            }
            _ if !self.live_handles.contains(&*handle) => OpOutcome::Failed {
                code: ERR_BAD_HANDLE,
            },
            Opcode::GetVersion => OpOutcome::Done {
                value: u64::from(self.regs.get(&regs::VERSION).copied().unwrap_or(0)),
            },
            Opcode::FeedRingBuffer => {
                self.ring_fill = self.ring_fill.saturating_add(arg2);
                OpOutcome::Done {
                    value: self.ring_fill,
                }
            }
            Opcode::GetRingBufferStatus => OpOutcome::Done {
                value: self.ring_fill,
            },
            Opcode::DecodeFrame => {
                self.ring_fill = self.ring_fill.saturating_sub(arg2);
                OpOutcome::Done { value: arg2 }
            }
            Opcode::SwReset => {
                self.ring_fill = 0;
                OpOutcome::Done { value: 0 }
            }
            Opcode::ParseSequenceHeader
            | Opcode::RegisterFrameBuffers
            | Opcode::FlushOutput
            | Opcode::ClearBufferFlag => OpOutcome::Done { value: 0 },
        }
    }

    /// Decide whether the completion interrupt fires for this command.
    fn take_irq(&mut self, opcode: Opcode) -> Option<IrqHandler> {
        if !opcode.requires_confirmation() || !self.powered() {
            return None;
        }
        if let Some(remaining) = self.suppressed_irqs.get_mut(&opcode) {
            if *remaining > 0 {
                *remaining -= 1;
                return None;
            }
        }
        if !self.irq_enabled {
            return None;
        }
        self.irq_handler.clone()
    }

    fn latch_irq(&mut self, bits: IrqStatus) {
        let status = self.regs.entry(regs::INT_STATUS).or_insert(0);
        *status |= bits.bits();
    }
}

/// Simulated decode engine implementing [`HardwareAccess`].
pub struct SimulatedVpu {
    state: Mutex<SimState>,
}

impl Default for SimulatedVpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedVpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("SimulatedVpu")
            .field("clock_votes", &st.clock_votes)
            .field("in_reset", &st.in_reset)
            .field("irq_enabled", &st.irq_enabled)
            .field("live_handles", &st.live_handles.len())
            .field("ops", &st.log.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedVpu {
    pub fn new() -> Self {
        let mut register_file = BTreeMap::new();
        register_file.insert(regs::VERSION, SIM_VERSION);
        Self {
            state: Mutex::new(SimState {
                regs: register_file,
                clock_votes: 0,
                in_reset: true,
                reset_releases: 0,
                irq_handler: None,
                irq_enabled: false,
                dumps: 0,
                memory_window_bytes: DEFAULT_MEMORY_WINDOW_BYTES,
                reserved_bytes: None,
                next_handle: HANDLE_BASE,
                live_handles: BTreeSet::new(),
                ring_fill: 0,
                log: Vec::new(),
                scripted_failures: VecDeque::new(),
                suppressed_irqs: BTreeMap::new(),
                zero_handle_inits: 0,
                irq_latency: None,
            }),
        }
    }

    /// Limit the work-memory window that [`HardwareAccess::reserve_work_memory`] can hand out.
    pub fn with_memory_window(self, bytes: u64) -> Self {
        self.lock().memory_window_bytes = bytes;
        self
    }

    /// Deliver completion interrupts from a helper thread after `latency` instead of inline.
    pub fn with_irq_latency(self, latency: Duration) -> Self {
        self.lock().irq_latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the next `opcode` command exit with `code`.
    pub fn fail_next(&self, opcode: Opcode, code: i32) {
        self.lock().scripted_failures.push_back((opcode, code));
    }

    /// Swallow the completion interrupt of the next `count` `opcode` commands.
    pub fn suppress_irqs(&self, opcode: Opcode, count: u32) {
        *self.lock().suppressed_irqs.entry(opcode).or_insert(0) += count;
    }

    /// Make the next INIT report success without allocating a handle.
    pub fn return_zero_handle_on_next_init(&self) {
        self.lock().zero_handle_inits += 1;
    }

    pub fn clock_votes(&self) -> u32 {
        self.lock().clock_votes
    }

    pub fn in_reset(&self) -> bool {
        self.lock().in_reset
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered()
    }

    /// Number of times the engine was released from reset.
    pub fn power_up_count(&self) -> u32 {
        self.lock().reset_releases
    }

    pub fn irq_requested(&self) -> bool {
        self.lock().irq_handler.is_some()
    }

    pub fn irq_enabled(&self) -> bool {
        self.lock().irq_enabled
    }

    pub fn dump_count(&self) -> u32 {
        self.lock().dumps
    }

    pub fn memory_reserved(&self) -> bool {
        self.lock().reserved_bytes.is_some()
    }

    pub fn live_handles(&self) -> Vec<u64> {
        self.lock().live_handles.iter().copied().collect()
    }

    pub fn op_log(&self) -> Vec<OpRecord> {
        self.lock().log.clone()
    }

    pub fn op_count(&self, opcode: Opcode) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|rec| rec.opcode == opcode)
            .count()
    }

    pub fn clear_op_log(&self) {
        self.lock().log.clear();
    }
}

impl HardwareAccess for SimulatedVpu {
    fn read_reg(&self, offset: u32) -> u32 {
        self.lock().regs.get(&offset).copied().unwrap_or(0)
    }

    fn write_reg(&self, offset: u32, value: u32) {
        let mut st = self.lock();
        match offset {
            regs::VERSION => {}
            regs::INT_CLEAR => {
                let status = st.regs.entry(regs::INT_STATUS).or_insert(0);
                *status &= !value;
            }
            _ => {
                st.regs.insert(offset, value);
            }
        }
    }

    fn enable_clocks(&self) -> Result<(), HalError> {
        let mut st = self.lock();
        st.clock_votes = st
            .clock_votes
            .checked_add(1)
            .ok_or_else(|| HalError::Clock("clock vote overflow".into()))?;
        Ok(())
    }

    fn disable_clocks(&self) {
        let mut st = self.lock();
        if st.clock_votes == 0 {
            tracing::warn!("clock disable without a matching enable");
            return;
        }
        st.clock_votes -= 1;
    }

    fn assert_reset(&self) {
        let mut st = self.lock();
        st.in_reset = true;
        st.ring_fill = 0;
        st.live_handles.clear();
        st.regs.insert(regs::INT_STATUS, 0);
    }

    fn deassert_reset(&self) {
        let mut st = self.lock();
        st.in_reset = false;
        st.reset_releases += 1;
    }

    fn request_irq(&self, handler: IrqHandler) -> Result<(), HalError> {
        let mut st = self.lock();
        if st.irq_handler.is_some() {
            return Err(HalError::IrqBusy);
        }
        st.irq_handler = Some(handler);
        Ok(())
    }

    fn free_irq(&self) {
        let mut st = self.lock();
        st.irq_handler = None;
        st.irq_enabled = false;
    }

    fn enable_irq(&self) {
        self.lock().irq_enabled = true;
    }

    fn disable_irq(&self) {
        self.lock().irq_enabled = false;
    }

    fn dump_state(&self) {
        let mut st = self.lock();
        st.dumps += 1;
        tracing::error!(
            clock_votes = st.clock_votes,
            in_reset = st.in_reset,
            irq_enabled = st.irq_enabled,
            int_status = st.regs.get(&regs::INT_STATUS).copied().unwrap_or(0),
            command = st.regs.get(&regs::COMMAND).copied().unwrap_or(0),
            instance = st.regs.get(&regs::INSTANCE).copied().unwrap_or(0),
            live_handles = st.live_handles.len(),
            ring_fill = st.ring_fill,
            "simulated engine state dump"
        );
    }

    fn reserve_work_memory(&self, bytes: u64) -> Result<u64, HalError> {
        let mut st = self.lock();
        if bytes > st.memory_window_bytes {
            return Err(HalError::OutOfMemory {
                requested: bytes,
                available: st.memory_window_bytes,
            });
        }
        st.reserved_bytes = Some(bytes);
        Ok(WORK_MEMORY_BASE)
    }

    fn release_work_memory(&self, base: u64) {
        let mut st = self.lock();
        if base != WORK_MEMORY_BASE || st.reserved_bytes.take().is_none() {
            tracing::warn!(base, "release of unreserved work memory");
        }
    }

    fn run_operation(&self, opcode: Opcode, handle: &mut u64, arg1: u64, arg2: u64) -> OpOutcome {
        let (outcome, irq, latency) = {
            let mut st = self.lock();
            st.log.push(OpRecord {
                opcode,
                handle: *handle,
                arg1,
                arg2,
            });
            st.regs.insert(regs::COMMAND, opcode.as_raw());
            st.regs.insert(regs::INSTANCE, *handle as u32);

            let outcome = st.execute(opcode, handle, arg2);
            let irq = st.take_irq(opcode);
            if irq.is_some() {
                let mut bits = IrqStatus::COMMAND_DONE;
                if !outcome.is_done() {
                    bits |= IrqStatus::ERROR;
                }
                st.latch_irq(bits);
            }
            (outcome, irq, st.irq_latency)
        };

        // Raise outside the state lock: handlers may call back into the engine.
        if let Some(handler) = irq {
            match latency {
                Some(latency) => {
                    std::thread::spawn(move || {
                        std::thread::sleep(latency);
                        handler();
                    });
                }
                None => handler(),
            }
        }

        outcome
    }
}
