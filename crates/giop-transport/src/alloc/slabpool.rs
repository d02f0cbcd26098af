// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free slab allocator for queued messages and their buffers.
//!
//! Requests are served from size-class pools. Each class tracks slot
//! occupancy in one atomic bitmap (at most 64 slots per class); a slot is
//! claimed with a single CAS and its storage is materialised on first use,
//! then recycled on every subsequent free.
//!
//! When the best-fit class is full the request falls through to the next
//! larger class. Once every eligible class is exhausted `allocate` returns
//! `None` and the caller treats it as a recoverable allocation failure.

use std::convert::TryFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Allocator, Block};

/// Handle to a reserved slab slot
///
/// Encoded as: upper 16 bits = pool_id, lower 16 bits = slot_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabHandle(pub u32);

impl SlabHandle {
    fn new(pool_id: u16, slot_id: u16) -> Self {
        Self((u32::from(pool_id) << 16) | u32::from(slot_id))
    }

    pub fn pool_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn slot_id(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

/// Default size classes: (slot_size, slot_count).
///
/// Small classes hold queued-message objects and short GIOP replies,
/// larger ones hold cloned remainders of big requests.
pub const DEFAULT_SIZE_CLASSES: &[(usize, usize)] = &[
    (64, 64),
    (128, 64),
    (256, 64),
    (512, 64),
    (1024, 64),
    (2048, 32),
    (4096, 32),
    (8192, 32),
    (16384, 16),
    (65536, 8),
];

const MAX_SLOTS_PER_CLASS: usize = 64;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-class state: occupancy bitmap plus recyclable slot storage.
struct SizeClass {
    bitmap: AtomicU64,
    slots: Vec<Mutex<Option<Box<[u8]>>>>,
    slot_size: usize,
    slot_count: usize,
}

impl SizeClass {
    fn new(slot_size: usize, slot_count: usize) -> Self {
        let slot_count = slot_count.min(MAX_SLOTS_PER_CLASS);
        let slots = (0..slot_count).map(|_| Mutex::new(None)).collect();
        Self {
            bitmap: AtomicU64::new(0),
            slots,
            slot_size,
            slot_count,
        }
    }

    /// Claim a free slot, returning its index and storage.
    fn try_claim(&self) -> Option<(u16, Box<[u8]>)> {
        loop {
            let bitmap = self.bitmap.load(Ordering::Acquire);

            // bit=0 means free
            let slot_index = usize::try_from((!bitmap).trailing_zeros()).ok()?;
            if slot_index >= self.slot_count {
                return None;
            }

            let new_bitmap = bitmap | (1u64 << slot_index);
            if self
                .bitmap
                .compare_exchange(bitmap, new_bitmap, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // The bit grants exclusive use of this slot's storage.
                let storage = self.slots[slot_index]
                    .lock()
                    .take()
                    .unwrap_or_else(|| vec![0u8; self.slot_size].into_boxed_slice());
                let slot_id = u16::try_from(slot_index).ok()?;
                return Some((slot_id, storage));
            }
        }
    }

    fn is_claimed(&self, slot_id: u16) -> bool {
        let mask = 1u64 << slot_id;
        self.bitmap.load(Ordering::Acquire) & mask != 0
    }

    /// Put storage back and mark the slot free.
    fn release(&self, slot_id: u16, storage: Box<[u8]>) {
        debug_assert!(usize::from(slot_id) < self.slot_count, "Invalid slot_id");

        *self.slots[usize::from(slot_id)].lock() = Some(storage);
        self.bitmap.fetch_and(!(1u64 << slot_id), Ordering::AcqRel);
    }

    fn claimed(&self) -> u32 {
        self.bitmap.load(Ordering::Acquire).count_ones()
    }
}

/// Counters exposed by [`SlabPool::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlabStats {
    /// Successful allocations
    pub allocations: u64,
    /// Blocks returned to a slot
    pub frees: u64,
    /// Requests no class could satisfy
    pub failures: u64,
    /// Slots currently claimed
    pub outstanding: u64,
}

/// Memory pool for queued messages and message buffers.
///
/// Safe to share between threads; typically held as a
/// [`SharedAllocator`](super::SharedAllocator).
pub struct SlabPool {
    id: u64,
    classes: Vec<SizeClass>,
    allocations: AtomicU64,
    frees: AtomicU64,
    failures: AtomicU64,
}

impl SlabPool {
    /// Pool with [`DEFAULT_SIZE_CLASSES`].
    pub fn new() -> Self {
        Self::with_classes(DEFAULT_SIZE_CLASSES)
    }

    /// Pool with custom `(slot_size, slot_count)` classes.
    ///
    /// Classes are sorted by slot size; slot counts above 64 are clamped.
    pub fn with_classes(classes: &[(usize, usize)]) -> Self {
        let mut sorted: Vec<(usize, usize)> = classes.to_vec();
        sorted.sort_unstable_by_key(|&(size, _)| size);

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            classes: sorted
                .into_iter()
                .map(|(size, count)| SizeClass::new(size, count))
                .collect(),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Largest request this pool can ever satisfy.
    pub fn max_block_size(&self) -> usize {
        self.classes.last().map_or(0, |c| c.slot_size)
    }

    pub fn stats(&self) -> SlabStats {
        SlabStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            outstanding: self.classes.iter().map(|c| u64::from(c.claimed())).sum(),
        }
    }

    fn owns(&self, handle: SlabHandle, capacity: usize, origin: u64) -> Option<&SizeClass> {
        if origin != self.id {
            return None;
        }
        let class = self.classes.get(usize::from(handle.pool_id()))?;
        if usize::from(handle.slot_id()) >= class.slot_count || capacity != class.slot_size {
            return None;
        }
        class.is_claimed(handle.slot_id()).then_some(class)
    }
}

impl Default for SlabPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabPool")
            .field("id", &self.id)
            .field("classes", &self.classes.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Allocator for SlabPool {
    fn allocate(&self, size: usize) -> Option<Block> {
        let start = self.classes.iter().position(|c| c.slot_size >= size.max(1));

        if let Some(start) = start {
            for (pool_id, class) in self.classes.iter().enumerate().skip(start) {
                if let Some((slot_id, storage)) = class.try_claim() {
                    let Ok(pool_id) = u16::try_from(pool_id) else {
                        class.release(slot_id, storage);
                        continue;
                    };
                    self.allocations.fetch_add(1, Ordering::Relaxed);
                    let handle = SlabHandle::new(pool_id, slot_id);
                    return Some(Block::from_slot(storage, size, handle, self.id));
                }
            }
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        log::debug!("[slab] pool {} exhausted for {} byte request", self.id, size);
        None
    }

    fn free(&self, block: Block) {
        let origin = block.origin();
        let capacity = block.capacity();
        let (storage, handle) = block.into_storage();

        let Some(handle) = handle else {
            log::trace!("[slab] dropping heap block of {} bytes", capacity);
            return;
        };

        match self.owns(handle, capacity, origin) {
            Some(class) => {
                class.release(handle.slot_id(), storage);
                self.frees.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                log::warn!(
                    "[slab] pool {} refusing foreign block {:?}, dropping it",
                    self.id,
                    handle
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "slab"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SharedAllocator;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_handle_encoding() {
        let h = SlabHandle::new(42, 1337);
        assert_eq!(h.pool_id(), 42);
        assert_eq!(h.slot_id(), 1337);
    }

    #[test]
    fn test_allocate_best_fit() {
        let pool = SlabPool::new();

        let block = pool.allocate(10).expect("slab allocation should succeed");
        assert_eq!(block.len(), 10);
        assert_eq!(block.capacity(), 64);
        assert_eq!(block.handle().map(SlabHandle::pool_id), Some(0));

        let block = pool.allocate(100).expect("slab allocation should succeed");
        assert_eq!(block.capacity(), 128);
    }

    #[test]
    fn test_free_recycles_slot() {
        let pool = SlabPool::new();
        let block = pool.allocate(100).expect("slab allocation should succeed");
        let handle = block.handle();
        pool.free(block);

        let again = pool.allocate(100).expect("slab allocation should succeed");
        assert_eq!(again.handle(), handle);

        let stats = pool.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.outstanding, 1);
    }

    #[test]
    fn test_fallback_then_exhaustion() {
        let pool = SlabPool::with_classes(&[(16, 2), (32, 1)]);

        let a = pool.allocate(16).expect("first 16B slot");
        let b = pool.allocate(16).expect("second 16B slot");
        let c = pool.allocate(16).expect("fallback to 32B class");
        assert_eq!(c.capacity(), 32);

        assert!(pool.allocate(8).is_none());
        assert_eq!(pool.stats().failures, 1);

        pool.free(a);
        pool.free(b);
        pool.free(c);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_oversized_request_fails() {
        let pool = SlabPool::with_classes(&[(64, 4)]);
        assert!(pool.allocate(65).is_none());
        assert_eq!(pool.max_block_size(), 64);
    }

    #[test]
    fn test_foreign_block_not_recycled() {
        let pool = SlabPool::with_classes(&[(64, 1)]);
        let other = SlabPool::with_classes(&[(64, 1)]);

        let foreign = other.allocate(64).expect("slab allocation should succeed");
        pool.free(foreign);
        assert_eq!(pool.stats().frees, 0);

        pool.free(Block::heap(64));
        assert_eq!(pool.stats().frees, 0);
    }

    #[test]
    fn test_concurrent_allocate_free() {
        let pool: SharedAllocator = Arc::new(SlabPool::with_classes(&[(128, 64)]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(block) = pool.allocate(100) {
                            pool.free(block);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let block = pool.allocate(128).expect("all slots returned");
        pool.free(block);
    }
}
