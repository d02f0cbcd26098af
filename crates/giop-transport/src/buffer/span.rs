// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A consumable window onto shared block storage.

use std::fmt;
use std::sync::Arc;

use crate::alloc::{AllocError, Block, BlockLease, SharedAllocator};

/// One contiguous byte range of a [`BufferChain`](super::BufferChain).
///
/// The storage is reference counted: [`share`](ByteSpan::share) hands out a
/// second span over the same bytes without copying, and identity checks
/// ([`same_storage`](ByteSpan::same_storage)) compare the storage, not the
/// window. Consuming bytes with [`advance`](ByteSpan::advance) only moves
/// this span's window; other spans over the same storage are unaffected.
#[derive(Clone)]
pub struct ByteSpan {
    storage: Arc<BlockLease>,
    start: usize,
    end: usize,
}

impl ByteSpan {
    /// Span over freshly leased storage covering `lease[..len]`.
    pub(crate) fn from_lease(storage: Arc<BlockLease>, len: usize) -> Self {
        debug_assert!(len <= storage.len());
        Self {
            storage,
            start: 0,
            end: len,
        }
    }

    /// Take ownership of `data` without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self::from_lease(Arc::new(BlockLease::unpooled(Block::from_vec(data))), len)
    }

    /// Copy `data` into storage obtained from `allocator` (heap when `None`).
    pub fn copy_from(data: &[u8], allocator: Option<&SharedAllocator>) -> Result<Self, AllocError> {
        let mut lease = BlockLease::allocate(allocator, data.len())?;
        lease.as_mut_slice().copy_from_slice(data);
        Ok(Self::from_lease(Arc::new(lease), data.len()))
    }

    /// A span with no bytes.
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Unconsumed bytes.
    pub fn data(&self) -> &[u8] {
        &self.storage.as_slice()[self.start..self.end]
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes consumed from the front since the span was created.
    pub fn consumed(&self) -> usize {
        self.start
    }

    /// Consume `n` bytes from the front.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len()`.
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "ByteSpan::advance({}) past end ({} bytes left)",
            n,
            self.len()
        );
        self.start += n;
    }

    /// Another span over the same storage and window, without copying.
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Whether both spans view the same underlying storage.
    pub fn same_storage(&self, other: &ByteSpan) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Whether no other span references this storage.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.storage) == 1
    }

    pub(crate) fn storage(&self) -> &Arc<BlockLease> {
        &self.storage
    }
}

impl fmt::Debug for ByteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSpan")
            .field("len", &self.len())
            .field("consumed", &self.consumed())
            .field("shared", &!self.is_unique())
            .finish()
    }
}

impl From<&[u8]> for ByteSpan {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

impl From<Vec<u8>> for ByteSpan {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}
