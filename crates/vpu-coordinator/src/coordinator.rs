//! Session lifecycle and the public face of the coordinator.
//!
//! Sessions are reference counted. The first open powers the engine up (clocks, reset pulse,
//! interrupt line, work memory) and the last close powers it down again after force-closing any
//! instances clients left behind. Each additional session holds one more clock vote.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use vpu_hal::{HardwareAccess, Opcode};

use crate::config::CoordinatorConfig;
use crate::executor::HardwareExecutor;
use crate::fault::FaultPolicy;
use crate::queue::CommandQueue;
use crate::regions::{RegionAllocator, WorkRegions};
use crate::slots::{InstanceTable, SlotSnapshot};
use crate::stats::{CoordinatorStats, StatsCounters};
use crate::task::{Request, Task, TaskResult, Ticket};
use crate::{worker, CoordinatorError, TaskError};

/// State shared between client threads and the dispatcher.
pub(crate) struct Shared {
    pub(crate) config: CoordinatorConfig,
    pub(crate) queue: CommandQueue,
    pub(crate) table: InstanceTable,
    pub(crate) regions: WorkRegions,
    pub(crate) executor: HardwareExecutor,
    pub(crate) stats: StatsCounters,
    /// Mirror of the session count the dispatcher reads without the lifecycle lock.
    sessions: AtomicUsize,
    suspended: AtomicBool,
    force_closed: AtomicBool,
    stopping: AtomicBool,
    next_task_id: AtomicU64,
    /// Held by the dispatcher for the whole of each task, including the engine call. Power
    /// transitions and forced closes take it to wait out the command in flight. Submitters and
    /// queries never touch it, and the queue, table and lifecycle locks are never held across
    /// an engine call.
    engine_gate: Mutex<()>,
}

impl Shared {
    fn new(hal: Arc<dyn HardwareAccess>, config: CoordinatorConfig) -> Self {
        let executor = HardwareExecutor::new(hal, config.irq_timeout());
        Self {
            queue: CommandQueue::new(),
            table: InstanceTable::new(config.slot_count),
            regions: WorkRegions::default(),
            executor,
            stats: StatsCounters::default(),
            sessions: AtomicUsize::new(0),
            suspended: AtomicBool::new(false),
            force_closed: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
            engine_gate: Mutex::new(()),
            config,
        }
    }

    pub(crate) fn engine_gate(&self) -> MutexGuard<'_, ()> {
        self.engine_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the dispatcher may issue commands to the engine.
    pub(crate) fn engine_available(&self) -> bool {
        self.sessions.load(Ordering::Acquire) > 0 && !self.suspended.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn clear_force_closed(&self) {
        self.force_closed.store(false, Ordering::Release);
    }

    fn hal(&self) -> &dyn HardwareAccess {
        self.executor.hal().as_ref()
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    sessions: usize,
    powered: bool,
    suspended: bool,
    window_base: Option<u64>,
}

/// Serializes decode commands from many clients onto one engine.
pub struct Coordinator {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.shared.config)
            .field("lifecycle", &*self.lifecycle())
            .field("queue_len", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator and start its dispatcher thread. The engine stays powered down until
    /// the first [`Coordinator::open`].
    pub fn new(
        hal: Arc<dyn HardwareAccess>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let shared = Arc::new(Shared::new(hal, config));
        let handle = worker::spawn(Arc::clone(&shared)).map_err(CoordinatorError::WorkerSpawn)?;
        tracing::debug!(slots = shared.config.slot_count, "coordinator created");
        Ok(Self {
            shared,
            lifecycle: Mutex::new(Lifecycle::default()),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- tasks --

    /// Queue `request` behind everything already submitted. The ticket always resolves; after
    /// shutdown it resolves immediately with [`TaskError::InvalidInstance`].
    pub fn submit(&self, request: Request) -> Ticket {
        let shared = &self.shared;
        let id = shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (task, ticket) = Task::new(id, request);

        if shared.is_stopping() {
            task.finish(Err(TaskError::InvalidInstance));
            return ticket;
        }

        shared.stats.submitted();
        tracing::trace!(
            task = id,
            instance = request.instance,
            opcode = %request.opcode,
            "task submitted"
        );
        shared.queue.enqueue(task);

        // Lost a race with shutdown: the dispatcher may already be gone.
        if shared.is_stopping() {
            if let Some(task) = shared.queue.remove(id) {
                task.finish(Err(TaskError::InvalidInstance));
            }
        }
        ticket
    }

    /// Submit `request` and block until it completes.
    pub fn execute(&self, request: Request) -> TaskResult {
        self.submit(request).wait()
    }

    // -- sessions --

    /// Open a client session, powering the engine up if it is the first.
    pub fn open(&self) -> Result<(), CoordinatorError> {
        let mut lc = self.lifecycle();
        if self.shared.is_stopping() {
            return Err(CoordinatorError::ShutDown);
        }
        if lc.suspended {
            return Err(CoordinatorError::Suspended);
        }

        if lc.sessions == 0 {
            self.power_up(&mut lc)?;
        } else {
            self.shared.hal().enable_clocks()?;
        }
        lc.sessions += 1;
        self.shared.sessions.store(lc.sessions, Ordering::Release);
        tracing::info!(sessions = lc.sessions, "session opened");
        Ok(())
    }

    /// Close a client session. The last close force-closes leftover instances and powers the
    /// engine down.
    pub fn close(&self) -> Result<(), CoordinatorError> {
        let mut lc = self.lifecycle();
        match lc.sessions {
            0 => {
                tracing::warn!("close without an open session");
                Err(CoordinatorError::NoOpenSession)
            }
            1 => {
                if !self.shared.force_closed.load(Ordering::Acquire) {
                    self.force_close_locked();
                }
                lc.sessions = 0;
                self.stop_dispatching();
                self.power_down(&mut lc);
                tracing::info!(sessions = 0, "session closed");
                Ok(())
            }
            n => {
                lc.sessions = n - 1;
                self.shared.sessions.store(lc.sessions, Ordering::Release);
                if !lc.suspended {
                    self.shared.hal().disable_clocks();
                }
                tracing::info!(sessions = lc.sessions, "session closed");
                Ok(())
            }
        }
    }

    /// Issue CLOSE for every open instance, waiting a bounded time for each.
    ///
    /// Returns how many instances ended up closed. Does nothing while the engine is down or
    /// suspended.
    pub fn force_close_all(&self) -> usize {
        let lc = self.lifecycle();
        if lc.sessions == 0 || lc.suspended {
            return 0;
        }
        self.force_close_locked()
    }

    /// Close every open instance and drop all clock votes. Commands submitted while suspended
    /// are rejected.
    pub fn suspend(&self) {
        let mut lc = self.lifecycle();
        if lc.suspended {
            tracing::debug!("already suspended");
            return;
        }
        if lc.sessions > 0 {
            self.force_close_locked();
            {
                let _gate = self.shared.engine_gate();
                self.shared.suspended.store(true, Ordering::Release);
            }
            for _ in 0..lc.sessions {
                self.shared.hal().disable_clocks();
            }
        } else {
            self.shared.suspended.store(true, Ordering::Release);
        }
        lc.suspended = true;
        tracing::info!(sessions = lc.sessions, "engine suspended");
    }

    /// Re-take one clock vote per open session.
    pub fn resume(&self) -> Result<(), CoordinatorError> {
        let mut lc = self.lifecycle();
        if !lc.suspended {
            return Ok(());
        }
        let hal = self.shared.hal();
        for taken in 0..lc.sessions {
            if let Err(err) = hal.enable_clocks() {
                for _ in 0..taken {
                    hal.disable_clocks();
                }
                tracing::error!(error = %err, "failed to restore clocks");
                return Err(err.into());
            }
        }
        lc.suspended = false;
        self.shared.suspended.store(false, Ordering::Release);
        tracing::info!(sessions = lc.sessions, "engine resumed");
        Ok(())
    }

    /// Same as [`Coordinator::resume`]; kept under the name the admin surface uses.
    pub fn restore_clocks(&self) -> Result<(), CoordinatorError> {
        self.resume()
    }

    /// Stop the dispatcher, reject everything still queued and power the engine down.
    /// Idempotent; also run on drop.
    pub fn shutdown(&self) {
        let mut lc = self.lifecycle();
        if self.shared.is_stopping() {
            return;
        }
        if lc.sessions > 0 && !lc.suspended && !self.shared.force_closed.load(Ordering::Acquire) {
            self.force_close_locked();
        }

        self.shared.stopping.store(true, Ordering::Release);
        self.shared.queue.wake_all();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("dispatcher thread panicked");
            }
        }

        let leftover = self.shared.queue.drain();
        if !leftover.is_empty() {
            tracing::warn!(tasks = leftover.len(), "rejecting queued tasks at shutdown");
        }
        for task in leftover {
            task.finish(Err(TaskError::InvalidInstance));
        }

        if lc.sessions > 0 {
            tracing::warn!(sessions = lc.sessions, "shutting down with open sessions");
            lc.sessions = 0;
            self.shared.sessions.store(0, Ordering::Release);
            self.power_down(&mut lc);
        }
        tracing::info!("coordinator shut down");
    }

    fn power_up(&self, lc: &mut Lifecycle) -> Result<(), CoordinatorError> {
        let shared = &self.shared;
        let hal = shared.hal();
        let config = &shared.config;

        hal.enable_clocks()?;
        hal.assert_reset();
        hal.deassert_reset();

        let monitor = shared.executor.monitor();
        monitor.reset();
        if let Err(err) = hal.request_irq(monitor.irq_handler()) {
            tracing::error!(error = %err, "failed to request engine interrupt");
            hal.assert_reset();
            hal.disable_clocks();
            return Err(err.into());
        }
        hal.enable_irq();

        let base = match hal.reserve_work_memory(config.work_pool_bytes) {
            Ok(base) => base,
            Err(err) => {
                tracing::error!(error = %err, "failed to reserve work memory; rolling back");
                hal.disable_irq();
                hal.free_irq();
                hal.assert_reset();
                hal.disable_clocks();
                return Err(CoordinatorError::ResourceExhausted(err));
            }
        };

        let allocator =
            RegionAllocator::new(base, config.work_pool_bytes, config.work_region_bytes);
        let regions = allocator.capacity();
        shared.regions.install(allocator);
        shared.table.reset_diagnostics();
        shared.executor.clear_needs_reset();
        shared.clear_force_closed();

        lc.window_base = Some(base);
        lc.powered = true;
        tracing::info!(
            version = hal.read_reg(vpu_hal::regs::VERSION),
            work_base = base,
            regions,
            "engine powered up"
        );
        Ok(())
    }

    /// Publish `sessions == 0` once the command in flight (if any) has finished.
    fn stop_dispatching(&self) {
        let _gate = self.shared.engine_gate();
        self.shared.sessions.store(0, Ordering::Release);
    }

    fn power_down(&self, lc: &mut Lifecycle) {
        let shared = &self.shared;
        let hal = shared.hal();

        let stale = shared.table.invalidate_all();
        if stale > 0 {
            tracing::warn!(slots = stale, "instances still open at power down");
        }
        hal.disable_irq();
        hal.free_irq();
        shared.regions.teardown();
        if let Some(base) = lc.window_base.take() {
            hal.release_work_memory(base);
        }
        hal.assert_reset();
        if !lc.suspended {
            hal.disable_clocks();
        }

        let after_timeout = shared.executor.needs_reset();
        shared.executor.clear_needs_reset();
        lc.powered = false;
        tracing::info!(after_timeout, "engine powered down");
    }

    fn force_close_locked(&self) -> usize {
        let shared = &self.shared;
        let open = shared.table.open_slots();
        if open.is_empty() {
            shared.force_closed.store(true, Ordering::Release);
            return 0;
        }

        tracing::info!(instances = open.len(), "force closing open instances");
        let bound = shared.config.force_close_timeout();
        let mut closed = 0;
        for index in open {
            let ticket = self.submit(Request::new(index, Opcode::Close));
            match ticket.wait_timeout(bound) {
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(instance = index, error = %err, "forced close reported error");
                }
                None => match shared.queue.remove(ticket.id()) {
                    Some(task) => {
                        tracing::warn!(
                            instance = index,
                            "forced close still queued; closing slot without the engine"
                        );
                        task.finish(Err(TaskError::HardwareTimeout));
                        let _gate = shared.engine_gate();
                        if let Some(region) = shared.table.mark_closed(index) {
                            shared.regions.free(region);
                        }
                    }
                    None => {
                        // Already dispatched; the interrupt timeout bounds it.
                        tracing::warn!(instance = index, "forced close not acknowledged in time");
                        let _ = ticket.wait();
                    }
                },
            }
            if shared.table.is_closed(index) == Some(true) {
                closed += 1;
            }
        }
        shared.force_closed.store(true, Ordering::Release);
        closed
    }

    // -- queries --

    pub fn session_count(&self) -> usize {
        self.lifecycle().sessions
    }

    pub fn is_powered(&self) -> bool {
        self.lifecycle().powered
    }

    pub fn is_suspended(&self) -> bool {
        self.lifecycle().suspended
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether a command has timed out since the engine last powered up.
    pub fn needs_reset(&self) -> bool {
        self.shared.executor.needs_reset()
    }

    pub fn slot_count(&self) -> usize {
        self.shared.table.len()
    }

    pub fn slot_closed(&self, index: usize) -> Result<bool, CoordinatorError> {
        self.shared
            .table
            .is_closed(index)
            .ok_or(CoordinatorError::InvalidSlot(index))
    }

    pub fn slot(&self, index: usize) -> Result<SlotSnapshot, CoordinatorError> {
        self.shared
            .table
            .snapshot(index)
            .ok_or(CoordinatorError::InvalidSlot(index))
    }

    pub fn slots(&self) -> Vec<SlotSnapshot> {
        self.shared.table.snapshots()
    }

    /// Reserve a free slot index for a new client instance.
    pub fn acquire_instance_index(&self) -> Option<usize> {
        self.shared.table.acquire_index()
    }

    pub fn release_instance_index(&self, index: usize) -> Result<(), CoordinatorError> {
        if self.shared.table.release_index(index) {
            Ok(())
        } else {
            Err(CoordinatorError::InvalidSlot(index))
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.shared.stats.snapshot(
            self.shared.executor.timeouts(),
            self.shared.queue.len(),
            self.shared.regions.in_use(),
        )
    }

    // -- fault injection --

    pub fn set_fault_policy(&self, policy: Arc<dyn FaultPolicy>) {
        tracing::info!(?policy, "fault policy installed");
        self.shared.executor.faults().set(policy);
    }

    pub fn clear_fault_policy(&self) {
        self.shared.executor.faults().clear();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
