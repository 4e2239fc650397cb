use std::sync::{Mutex, MutexGuard, PoisonError};

/// Work memory owned by one decoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub index: usize,
    pub base: u64,
    pub len: u64,
}

/// Fixed-size carve-out of the engine's work-memory window.
#[derive(Debug)]
pub struct RegionAllocator {
    base: u64,
    region_bytes: u64,
    in_use: Vec<bool>,
}

impl RegionAllocator {
    pub fn new(base: u64, pool_bytes: u64, region_bytes: u64) -> Self {
        let count = if region_bytes == 0 {
            0
        } else {
            (pool_bytes / region_bytes) as usize
        };
        Self {
            base,
            region_bytes,
            in_use: vec![false; count],
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.iter().filter(|used| **used).count()
    }

    pub fn alloc(&mut self) -> Option<Region> {
        let index = self.in_use.iter().position(|used| !used)?;
        self.in_use[index] = true;
        Some(Region {
            index,
            base: self.base + index as u64 * self.region_bytes,
            len: self.region_bytes,
        })
    }

    /// Returns `false` (and changes nothing) if `region` was not allocated from this pool.
    pub fn free(&mut self, region: Region) -> bool {
        let expected_base = self.base + region.index as u64 * self.region_bytes;
        match self.in_use.get_mut(region.index) {
            Some(used) if *used && region.base == expected_base => {
                *used = false;
                true
            }
            _ => false,
        }
    }
}

/// The allocator for the current power cycle, or `None` while the engine is down.
#[derive(Debug, Default)]
pub(crate) struct WorkRegions {
    allocator: Mutex<Option<RegionAllocator>>,
}

impl WorkRegions {
    fn lock(&self) -> MutexGuard<'_, Option<RegionAllocator>> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn install(&self, allocator: RegionAllocator) {
        *self.lock() = Some(allocator);
    }

    pub(crate) fn teardown(&self) -> Option<RegionAllocator> {
        self.lock().take()
    }

    pub(crate) fn alloc(&self) -> Option<Region> {
        self.lock().as_mut()?.alloc()
    }

    pub(crate) fn free(&self, region: Region) {
        let mut allocator = self.lock();
        let freed = allocator.as_mut().is_some_and(|a| a.free(region));
        if !freed {
            // Regions from a previous power cycle vanish with their allocator.
            tracing::debug!(region = region.index, "region not owned by current allocator");
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.lock().as_ref().map_or(0, RegionAllocator::in_use)
    }
}
