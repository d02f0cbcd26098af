// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport configuration.
//!
//! # Example
//!
//! ```
//! use giop_transport::{AllocatorKind, TransportConfig};
//! use std::time::Duration;
//!
//! let config = TransportConfig {
//!     allocator: AllocatorKind::Slab,
//!     send_timeout: Some(Duration::from_secs(2)),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::alloc::slabpool::DEFAULT_SIZE_CLASSES;
use crate::alloc::{HeapAllocator, SharedAllocator, SlabPool};

/// Largest scatter-gather vector accepted by common kernels (`IOV_MAX`).
pub const DEFAULT_IOV_MAX: usize = 1024;

/// Queued-message transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    // === Writes ===
    /// Maximum entries per vectored write
    pub iov_max: usize,

    /// Enable TCP_NODELAY on TCP streams
    pub nodelay: bool,

    // === Buffers ===
    /// Block size used by output streams
    pub block_size: usize,

    /// Memory source for message copies and output streams
    pub allocator: AllocatorKind,

    // === Flow control ===
    /// Upper bound on unsent bytes held in the queue (0 = unlimited)
    pub max_queued_bytes: usize,

    /// How long a synchronous send waits for completion (None = forever)
    pub send_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            iov_max: DEFAULT_IOV_MAX,
            nodelay: true,

            block_size: 512,
            allocator: AllocatorKind::Heap,

            max_queued_bytes: 0, // Unlimited
            send_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Pooled buffers with a bounded queue, for servers with many connections.
    pub fn pooled() -> Self {
        Self {
            allocator: AllocatorKind::Slab,
            max_queued_bytes: 4 * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Small writes and a short send timeout, for request/reply latency.
    pub fn low_latency() -> Self {
        Self {
            iov_max: 64,
            block_size: 256,
            send_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        }
    }

    pub fn with_iov_max(mut self, iov_max: usize) -> Self {
        self.iov_max = iov_max;
        self
    }

    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_allocator(mut self, kind: AllocatorKind) -> Self {
        self.allocator = kind;
        self
    }

    pub fn with_max_queued_bytes(mut self, limit: usize) -> Self {
        self.max_queued_bytes = limit;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Validate configuration, returning error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.iov_max == 0 {
            return Err("iov_max must be > 0");
        }
        if self.iov_max > DEFAULT_IOV_MAX {
            return Err("iov_max too large (> 1024)");
        }
        if self.block_size < crate::giop::GIOP_HEADER_SIZE {
            return Err("block_size must hold a GIOP header (>= 12)");
        }
        if self.allocator == AllocatorKind::Slab && self.block_size > largest_slab_class() {
            return Err("block_size exceeds the largest slab class");
        }
        if self.send_timeout.is_some_and(|t| t.is_zero()) {
            return Err("send_timeout must be > 0");
        }
        Ok(())
    }

    /// Instantiate the configured allocator.
    pub fn build_allocator(&self) -> SharedAllocator {
        match self.allocator {
            AllocatorKind::Heap => HeapAllocator::shared(),
            AllocatorKind::Slab => Arc::new(SlabPool::new()),
        }
    }
}

fn largest_slab_class() -> usize {
    DEFAULT_SIZE_CLASSES
        .iter()
        .map(|&(size, _)| size)
        .max()
        .unwrap_or(0)
}

/// Memory source selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// Global heap, nothing is recycled
    #[default]
    Heap,
    /// Size-class slab pool with recycled slots
    Slab,
}

// ============================================================================
// Tests
// ============================================================================
