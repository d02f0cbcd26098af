// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output stream: the block buffer a request or reply is written into.
//!
//! The stream is the *lender* of borrowed chains. A synchronous send takes a
//! [`lend`](OutputStream::lend)ed view of the stream's blocks, and once the
//! send call returns the stream is [`reset`](OutputStream::reset) for the
//! next message. Blocks are only written or recycled while this stream is
//! their sole owner; a block still referenced by a queued message at reset
//! time is left to that message instead of being overwritten.
//!
//! ```text
//!  begin_message(Request)   write_bytes(..)            end_message()
//!  [hdr 12B | body ...... ] [ body ......... ] ... -> header size patched
//! ```

use std::sync::Arc;

use super::chain::BufferChain;
use super::span::ByteSpan;
use crate::alloc::{AllocError, BlockLease, SharedAllocator};
use crate::giop::{encode_size, GiopError, GiopHeader, MessageType, GIOP_HEADER_SIZE};

/// Default block size for output streams.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Reset accounting for an [`OutputStream`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputStats {
    /// Number of `reset()` calls
    pub resets: u64,
    /// Blocks kept for reuse by a reset
    pub reclaimed: u64,
    /// Blocks returned to the allocator by a reset
    pub released: u64,
    /// Blocks still lent at reset time and left to their borrowers
    pub abandoned: u64,
}

struct WriteBlock {
    storage: Arc<BlockLease>,
    filled: usize,
}

impl WriteBlock {
    fn capacity(&self) -> usize {
        self.storage.len()
    }
}

/// Append-only buffer of fixed-size blocks.
pub struct OutputStream {
    blocks: Vec<WriteBlock>,
    block_size: usize,
    allocator: Option<SharedAllocator>,
    pending: Option<GiopHeader>,
    stats: OutputStats,
}

impl OutputStream {
    /// Stream allocating `block_size` blocks from `allocator` (heap when `None`).
    pub fn new(block_size: usize, allocator: Option<SharedAllocator>) -> Self {
        Self {
            blocks: Vec::new(),
            block_size: block_size.max(GIOP_HEADER_SIZE),
            allocator,
            pending: None,
            stats: OutputStats::default(),
        }
    }

    /// Bytes written since the last reset.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.filled).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    /// Append `data`, allocating new blocks as needed.
    ///
    /// A tail block that is currently lent is never written to; a fresh
    /// block is started instead.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), AllocError> {
        let mut rest = data;

        while !rest.is_empty() {
            if let Some(tail) = self.blocks.last_mut() {
                let room = tail.capacity() - tail.filled;
                if room > 0 {
                    if let Some(lease) = Arc::get_mut(&mut tail.storage) {
                        let n = rest.len().min(room);
                        lease.as_mut_slice()[tail.filled..tail.filled + n]
                            .copy_from_slice(&rest[..n]);
                        tail.filled += n;
                        rest = &rest[n..];
                        continue;
                    }
                }
            }

            let lease = BlockLease::allocate(self.allocator.as_ref(), self.block_size)?;
            self.blocks.push(WriteBlock {
                storage: Arc::new(lease),
                filled: 0,
            });
        }

        Ok(())
    }

    /// Start a GIOP message: writes a header whose size is patched later.
    ///
    /// The stream must be empty (freshly created or reset); otherwise the
    /// header would not sit at the front of the first block.
    pub fn begin_message(&mut self, message_type: MessageType) -> Result<(), GiopError> {
        let len = self.len();
        if len > 0 {
            return Err(GiopError::StreamNotEmpty(len));
        }
        let header = GiopHeader::new(message_type, 0);
        self.write_bytes(&header.encode())?;
        self.pending = Some(header);
        Ok(())
    }

    /// Patch the body size into the header written by `begin_message`.
    pub fn end_message(&mut self) -> Result<GiopHeader, GiopError> {
        let mut header = self.pending.take().ok_or(GiopError::NoMessageStarted)?;
        let body = self.len() - GIOP_HEADER_SIZE;
        header.message_size = u32::try_from(body).map_err(|_| GiopError::BodyTooLarge(body))?;

        let first = self.blocks.first_mut().ok_or(GiopError::NoMessageStarted)?;
        let Some(lease) = Arc::get_mut(&mut first.storage) else {
            self.pending = Some(header);
            return Err(GiopError::HeaderShared);
        };
        lease.as_mut_slice()[8..GIOP_HEADER_SIZE]
            .copy_from_slice(&encode_size(header.message_size, header.is_little_endian()));

        Ok(header)
    }

    /// Borrowed chain over the written bytes; no data is copied.
    ///
    /// While the returned chain (or anything shared from it) is alive the
    /// lent blocks are not reused by this stream.
    pub fn lend(&self) -> BufferChain {
        BufferChain::from_spans(
            self.blocks
                .iter()
                .filter(|b| b.filled > 0)
                .map(|b| ByteSpan::from_lease(Arc::clone(&b.storage), b.filled))
                .collect(),
        )
    }

    /// Hand the written blocks over as an owned chain, leaving the stream empty.
    pub fn take_chain(&mut self) -> BufferChain {
        let spans = self
            .blocks
            .drain(..)
            .filter(|b| b.filled > 0)
            .map(|b| ByteSpan::from_lease(b.storage, b.filled))
            .collect();
        self.pending = None;
        BufferChain::from_spans(spans)
    }

    /// Prepare the stream for the next message.
    ///
    /// Keeps the first block this stream owns exclusively for reuse and
    /// returns the remaining exclusive blocks to the allocator. Blocks still
    /// lent are dropped from the stream without being touched.
    pub fn reset(&mut self) {
        self.stats.resets += 1;
        self.pending = None;

        let mut kept: Option<WriteBlock> = None;
        let mut abandoned = 0u64;

        for mut block in self.blocks.drain(..) {
            if Arc::strong_count(&block.storage) > 1 {
                abandoned += 1;
                continue;
            }
            if kept.is_none() {
                block.filled = 0;
                kept = Some(block);
                self.stats.reclaimed += 1;
            } else {
                self.stats.released += 1;
            }
        }

        // A completed send can still be in the leader's hands for a moment,
        // so abandoning here is routine. A borrower that failed to detach is
        // reported by the transport.
        if abandoned > 0 {
            self.stats.abandoned += abandoned;
            log::debug!(
                "[output] reset with {} block(s) still lent; leaving them to their borrowers",
                abandoned
            );
        }

        self.blocks.extend(kept);
    }
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, None)
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("len", &self.len())
            .field("blocks", &self.blocks.len())
            .field("block_size", &self.block_size)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{Allocator, SlabPool};

    #[test]
    fn test_write_spans_blocks() {
        let mut out = OutputStream::new(16, None);
        out.write_bytes(&[7u8; 40]).unwrap();

        assert_eq!(out.len(), 40);
        assert_eq!(out.block_count(), 3);
        assert_eq!(out.lend().to_vec(), vec![7u8; 40]);
    }

    #[test]
    fn test_giop_header_patched() {
        let mut out = OutputStream::new(64, None);
        out.begin_message(MessageType::Request).unwrap();
        out.write_bytes(b"payload").unwrap();
        let header = out.end_message().unwrap();

        assert_eq!(header.message_size, 7);
        let bytes = out.lend().to_vec();
        assert_eq!(GiopHeader::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[GIOP_HEADER_SIZE..], b"payload");
    }

    #[test]
    fn test_end_without_begin() {
        let mut out = OutputStream::default();
        assert_eq!(out.end_message(), Err(GiopError::NoMessageStarted));
    }

    #[test]
    fn test_begin_on_non_empty_stream_rejected() {
        let mut out = OutputStream::new(64, None);
        out.write_bytes(b"stale").unwrap();

        assert_eq!(
            out.begin_message(MessageType::Reply),
            Err(GiopError::StreamNotEmpty(5))
        );
        assert_eq!(out.end_message(), Err(GiopError::NoMessageStarted));
        assert_eq!(out.lend().to_vec(), b"stale");

        out.reset();
        out.begin_message(MessageType::Reply).unwrap();
        out.write_bytes(b"ok").unwrap();
        assert_eq!(out.end_message().unwrap().message_size, 2);
    }

    #[test]
    fn test_lent_block_not_overwritten() {
        let mut out = OutputStream::new(32, None);
        out.write_bytes(b"first").unwrap();
        let lent = out.lend();

        out.write_bytes(b"second").unwrap();
        assert_eq!(lent.to_vec(), b"first");
        assert_eq!(out.block_count(), 2);
        assert_eq!(out.lend().to_vec(), b"firstsecond");
    }

    #[test]
    fn test_reset_reclaims_exclusive_blocks() {
        let mut out = OutputStream::new(16, None);
        out.write_bytes(&[1u8; 40]).unwrap();
        out.reset();

        assert!(out.is_empty());
        assert_eq!(out.block_count(), 1);
        let stats = out.stats();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.abandoned, 0);
    }

    #[test]
    fn test_reset_abandons_lent_blocks() {
        let mut out = OutputStream::new(16, None);
        out.write_bytes(b"borrowed").unwrap();
        let lent = out.lend();

        out.reset();
        assert_eq!(out.stats().abandoned, 1);
        assert_eq!(out.block_count(), 0);
        assert_eq!(lent.to_vec(), b"borrowed");
    }

    #[test]
    fn test_released_blocks_return_to_pool() {
        let pool = Arc::new(SlabPool::with_classes(&[(64, 8)]));
        let shared: SharedAllocator = pool.clone();

        let mut out = OutputStream::new(64, Some(shared));
        out.write_bytes(&[0u8; 200]).unwrap();
        assert_eq!(pool.stats().outstanding, 4);

        out.reset();
        assert_eq!(pool.stats().outstanding, 1);

        drop(out);
        assert_eq!(pool.stats().outstanding, 0);
        assert!(pool.allocate(64).is_some());
    }

    #[test]
    fn test_take_chain_owns_blocks() {
        let mut out = OutputStream::new(16, None);
        out.write_bytes(b"owned bytes").unwrap();
        let chain = out.take_chain();

        assert!(out.is_empty());
        assert_eq!(chain.to_vec(), b"owned bytes");
        assert!(chain.current_span().unwrap().is_unique());
    }
}
