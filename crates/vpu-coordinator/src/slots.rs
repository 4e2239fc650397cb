use std::sync::{Mutex, MutexGuard, PoisonError};

use vpu_hal::Opcode;

use crate::regions::Region;

/// One logical decoder instance.
///
/// `closed == false` exactly when `handle != 0`; the two are only ever changed together.
#[derive(Debug, Clone)]
struct DecoderSlot {
    closed: bool,
    handle: u64,
    region: Option<Region>,
    claimed: bool,
    last_opcode: Option<Opcode>,
    last_frame_len: u64,
}

impl DecoderSlot {
    fn new() -> Self {
        Self {
            closed: true,
            handle: 0,
            region: None,
            claimed: false,
            last_opcode: None,
            last_frame_len: 0,
        }
    }

    fn close(&mut self) -> Option<Region> {
        self.closed = true;
        self.handle = 0;
        self.region.take()
    }
}

/// Read-only view of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub index: usize,
    pub closed: bool,
    pub handle: u64,
    pub claimed: bool,
    pub last_opcode: Option<Opcode>,
    pub last_frame_len: u64,
}

/// Open/closed state and handle the dispatcher needs before issuing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotState {
    pub closed: bool,
    pub handle: u64,
}

/// Fixed array of decoder slots.
///
/// Only the dispatcher thread changes open/closed state; everyone else reads snapshots.
#[derive(Debug)]
pub struct InstanceTable {
    slots: Mutex<Vec<DecoderSlot>>,
}

impl InstanceTable {
    pub fn new(count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![DecoderSlot::new(); count]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DecoderSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self, index: usize) -> Option<SlotSnapshot> {
        self.lock().get(index).map(|slot| snapshot_of(index, slot))
    }

    pub fn snapshots(&self) -> Vec<SlotSnapshot> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(index, slot)| snapshot_of(index, slot))
            .collect()
    }

    pub fn is_closed(&self, index: usize) -> Option<bool> {
        self.lock().get(index).map(|slot| slot.closed)
    }

    pub fn open_slots(&self) -> Vec<usize> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.closed)
            .map(|(index, _)| index)
            .collect()
    }

    /// Claim the lowest closed, unclaimed slot index for a new instance.
    pub fn acquire_index(&self) -> Option<usize> {
        let mut slots = self.lock();
        let index = slots
            .iter()
            .position(|slot| slot.closed && !slot.claimed)?;
        slots[index].claimed = true;
        Some(index)
    }

    /// Returns `false` for an out-of-range index.
    pub fn release_index(&self, index: usize) -> bool {
        match self.lock().get_mut(index) {
            Some(slot) => {
                slot.claimed = false;
                true
            }
            None => false,
        }
    }

    pub(crate) fn state(&self, index: usize) -> Option<SlotState> {
        self.lock().get(index).map(|slot| SlotState {
            closed: slot.closed,
            handle: slot.handle,
        })
    }

    pub(crate) fn record(&self, index: usize, opcode: Opcode, frame_len: Option<u64>) {
        if let Some(slot) = self.lock().get_mut(index) {
            slot.last_opcode = Some(opcode);
            if let Some(len) = frame_len {
                slot.last_frame_len = len;
            }
        }
    }

    /// Provisional step of INIT: drop any previous instance state, leaving the slot closed.
    ///
    /// Returns the region the slot held so the caller can release it.
    pub(crate) fn begin_init(&self, index: usize) -> Option<Region> {
        self.lock().get_mut(index).and_then(DecoderSlot::close)
    }

    /// Commit a successful INIT.
    pub(crate) fn commit_open(&self, index: usize, handle: u64, region: Region) {
        debug_assert_ne!(handle, 0, "open slot requires a hardware handle");
        if let Some(slot) = self.lock().get_mut(index) {
            slot.closed = false;
            slot.handle = handle;
            slot.region = Some(region);
        }
    }

    /// Mark a slot closed, returning its region for release.
    pub(crate) fn mark_closed(&self, index: usize) -> Option<Region> {
        self.lock().get_mut(index).and_then(DecoderSlot::close)
    }

    /// Close every slot without touching the engine. Returns how many were still open.
    pub(crate) fn invalidate_all(&self) -> usize {
        let mut slots = self.lock();
        let mut was_open = 0;
        for slot in slots.iter_mut() {
            if !slot.closed {
                was_open += 1;
            }
            slot.close();
        }
        was_open
    }

    pub(crate) fn reset_diagnostics(&self) {
        for slot in self.lock().iter_mut() {
            slot.last_opcode = None;
            slot.last_frame_len = 0;
        }
    }

    /// Log per-slot diagnostics as part of a timeout dump.
    pub(crate) fn log_diagnostics(&self) {
        for (index, slot) in self.lock().iter().enumerate() {
            if slot.closed && slot.last_opcode.is_none() {
                continue;
            }
            tracing::error!(
                instance = index,
                closed = slot.closed,
                handle = slot.handle,
                last_opcode = slot.last_opcode.map(Opcode::name).unwrap_or("-"),
                last_frame_len = slot.last_frame_len,
                "slot state"
            );
        }
    }
}

fn snapshot_of(index: usize, slot: &DecoderSlot) -> SlotSnapshot {
    SlotSnapshot {
        index,
        closed: slot.closed,
        handle: slot.handle,
        claimed: slot.claimed,
        last_opcode: slot.last_opcode,
        last_frame_len: slot.last_frame_len,
    }
}
