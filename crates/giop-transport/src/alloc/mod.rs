// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Allocator capability injected into buffers and queued messages.
//!
//! Every component that needs memory receives an [`Allocator`] explicitly
//! (usually as a [`SharedAllocator`]); there is no process-wide pool.
//!
//! - [`HeapAllocator`] - plain global heap, `free` simply drops the block
//! - [`SlabPool`] - lock-free size-class pool for high-throughput paths
//!
//! Memory handed out by an allocator travels as a [`Block`]. A [`BlockLease`]
//! ties a block to the allocator it came from and gives it back exactly once
//! when the lease is dropped.

pub mod slabpool;

pub use slabpool::{SlabHandle, SlabPool, SlabStats};

use std::fmt;
use std::sync::Arc;

/// Shared, thread-safe allocator handle.
pub type SharedAllocator = Arc<dyn Allocator>;

/// Returned when an allocator cannot satisfy a request.
///
/// Allocation failure is recoverable: the caller drops the transmission unit
/// it was building and keeps the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError {
    /// Number of bytes that were requested
    pub requested: usize,
}

impl AllocError {
    pub fn new(requested: usize) -> Self {
        Self { requested }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocation of {} bytes failed", self.requested)
    }
}

impl std::error::Error for AllocError {}

/// A contiguous region of memory obtained from an [`Allocator`].
///
/// `len` is the size that was requested; the backing storage may be larger
/// (slab slots are rounded up to their size class).
pub struct Block {
    data: Box<[u8]>,
    len: usize,
    handle: Option<SlabHandle>,
    origin: u64,
}

impl Block {
    /// Allocate a zeroed block directly on the global heap.
    pub fn heap(len: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
            len,
            handle: None,
            origin: 0,
        }
    }

    /// Adopt an existing heap buffer without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: data.into_boxed_slice(),
            len,
            handle: None,
            origin: 0,
        }
    }

    pub(crate) fn from_slot(data: Box<[u8]>, len: usize, handle: SlabHandle, origin: u64) -> Self {
        debug_assert!(len <= data.len());
        Self {
            data,
            len,
            handle: Some(handle),
            origin,
        }
    }

    /// Identity of the pool that produced this block (0 for heap blocks).
    pub(crate) fn origin(&self) -> u64 {
        self.origin
    }

    pub(crate) fn into_storage(self) -> (Box<[u8]>, Option<SlabHandle>) {
        (self.data, self.handle)
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the backing storage (>= `len`).
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Slab slot this block occupies, `None` for heap blocks.
    pub fn handle(&self) -> Option<SlabHandle> {
        self.handle
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Source of memory for buffers and message objects.
///
/// Implementations must tolerate concurrent `allocate`/`free` from many
/// threads.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Obtain a block of at least `size` bytes, or `None` when exhausted.
    fn allocate(&self, size: usize) -> Option<Block>;

    /// Give a block back. Blocks from a different allocator are dropped.
    fn free(&self, block: Block);

    /// Short name used in log messages.
    fn name(&self) -> &'static str {
        "allocator"
    }
}

/// Global-heap allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    pub fn shared() -> SharedAllocator {
        Arc::new(Self)
    }
}

impl Allocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Option<Block> {
        Some(Block::heap(size))
    }

    fn free(&self, block: Block) {
        drop(block);
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}

/// A block together with the allocator it must be returned to.
///
/// Dropping the lease frees the block to its allocator; a lease without an
/// allocator owns plain heap memory.
pub struct BlockLease {
    block: Option<Block>,
    allocator: Option<SharedAllocator>,
}

impl BlockLease {
    /// Wrap heap memory that no allocator tracks.
    pub fn unpooled(block: Block) -> Self {
        Self {
            block: Some(block),
            allocator: None,
        }
    }

    /// Allocate `size` bytes from `allocator`, or from the heap when `None`.
    pub fn allocate(allocator: Option<&SharedAllocator>, size: usize) -> Result<Self, AllocError> {
        match allocator {
            Some(alloc) => {
                let block = alloc.allocate(size).ok_or_else(|| AllocError::new(size))?;
                Ok(Self {
                    block: Some(block),
                    allocator: Some(Arc::clone(alloc)),
                })
            }
            None => Ok(Self::unpooled(Block::heap(size))),
        }
    }

    pub fn allocator(&self) -> Option<&SharedAllocator> {
        self.allocator.as_ref()
    }

    pub fn len(&self) -> usize {
        self.block.as_ref().map_or(0, Block::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.block.as_ref().map_or(&[], Block::as_slice)
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.block.as_mut() {
            Some(block) => block.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Return the block now. Idempotent: the second call finds nothing.
    pub fn release(&mut self) {
        if let Some(block) = self.block.take() {
            match &self.allocator {
                Some(alloc) => alloc.free(block),
                None => drop(block),
            }
        }
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for BlockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockLease")
            .field("block", &self.block)
            .field("allocator", &self.allocator.as_ref().map(|a| a.name()))
            .finish()
    }
}
