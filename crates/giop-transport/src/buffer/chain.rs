// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered sequence of byte spans forming one logical message.
//!
//! The chain keeps a cursor (`head`) on the first span that still has
//! unsent bytes. Spans before the cursor are fully consumed, empty spans are
//! stepped over as soon as the cursor reaches them, so the cursor either
//! designates a non-empty span or sits past the end (nothing left to send).
//!
//! ```text
//!  spans:  [ "AB" ][ "" ][ "CDE" ]
//!            ^ head               after advance_by(4):  [ ][ ][ "DE" ]
//!                                                               ^ head, offset 1
//! ```

use std::io::IoSlice;
use std::sync::Arc;

use super::span::ByteSpan;
use crate::alloc::{AllocError, BlockLease, SharedAllocator};

/// Location of the first unsent byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainPosition {
    /// Index of the span holding the first unsent byte
    pub span: usize,
    /// Bytes already consumed inside that span
    pub offset: usize,
}

/// A linked sequence of contiguous byte ranges.
#[derive(Clone, Debug, Default)]
pub struct BufferChain {
    spans: Vec<ByteSpan>,
    head: usize,
}

impl BufferChain {
    /// Empty chain (nothing to send).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spans(spans: Vec<ByteSpan>) -> Self {
        let mut chain = Self { spans, head: 0 };
        chain.skip_empty();
        chain
    }

    /// Chain of one span copied from `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_spans(vec![ByteSpan::from(data)])
    }

    /// Append a span at the tail.
    pub fn push(&mut self, span: ByteSpan) {
        self.spans.push(span);
        self.skip_empty();
    }

    /// All spans, including the ones already consumed.
    pub fn spans(&self) -> &[ByteSpan] {
        &self.spans
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Span holding the first unsent byte, `None` once everything is sent.
    pub fn current_span(&self) -> Option<&ByteSpan> {
        self.spans.get(self.head)
    }

    pub fn position(&self) -> ChainPosition {
        ChainPosition {
            span: self.head,
            offset: self.current_span().map_or(0, ByteSpan::consumed),
        }
    }

    /// True when no span has unconsumed bytes.
    pub fn is_exhausted(&self) -> bool {
        self.head >= self.spans.len()
    }

    /// Sum of unsent bytes from the cursor to the end.
    pub fn total_unsent_length(&self) -> usize {
        self.unsent().map(ByteSpan::len).sum()
    }

    /// Non-empty spans from the cursor onward.
    pub fn unsent(&self) -> impl Iterator<Item = &ByteSpan> {
        self.spans[self.head.min(self.spans.len())..]
            .iter()
            .filter(|span| !span.is_empty())
    }

    /// Scatter-gather view of at most `max_count` unsent spans.
    pub fn export_vectors(&self, max_count: usize) -> Vec<IoSlice<'_>> {
        let mut iov = Vec::with_capacity(max_count.min(self.spans.len()));
        self.fill_iov(max_count, &mut iov);
        iov
    }

    /// Append unsent spans to `iov` until it holds `iov_max` entries.
    ///
    /// Zero-length spans never produce an entry. Entries already present in
    /// `iov` count toward `iov_max`, so several chains can share one vector.
    pub fn fill_iov<'a>(&'a self, iov_max: usize, iov: &mut Vec<IoSlice<'a>>) {
        for span in self.unsent() {
            if iov.len() >= iov_max {
                break;
            }
            iov.push(IoSlice::new(span.data()));
        }
    }

    /// Consume exactly `n` bytes from the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`total_unsent_length`](Self::total_unsent_length);
    /// that indicates a transport bug, not bad input.
    pub fn advance_by(&mut self, n: usize) {
        let available = self.total_unsent_length();
        assert!(
            n <= available,
            "BufferChain::advance_by({}) overruns {} unsent bytes",
            n,
            available
        );

        let mut remaining = n;
        while remaining > 0 {
            let span = &mut self.spans[self.head];
            let take = remaining.min(span.len());
            span.advance(take);
            remaining -= take;
            self.skip_empty();
        }
    }

    /// Deep copy of the unsent remainder into one contiguous span.
    ///
    /// Bytes already sent are not copied. Storage comes from `allocator`
    /// (heap when `None`).
    pub fn clone_unsent(&self, allocator: Option<&SharedAllocator>) -> Result<Self, AllocError> {
        let total = self.total_unsent_length();
        if total == 0 {
            return Ok(Self::new());
        }

        let mut lease = BlockLease::allocate(allocator, total)?;
        let dst = lease.as_mut_slice();
        let mut offset = 0;
        for span in self.unsent() {
            dst[offset..offset + span.len()].copy_from_slice(span.data());
            offset += span.len();
        }
        debug_assert_eq!(offset, total);

        Ok(Self::from_spans(vec![ByteSpan::from_lease(Arc::new(lease), total)]))
    }

    /// Borrowed view of the unsent remainder over the same storage.
    pub fn share(&self) -> Self {
        Self::from_spans(self.unsent().map(ByteSpan::share).collect())
    }

    /// Whether any span of this chain views the same storage as `span`.
    ///
    /// Linear in the number of spans.
    pub fn contains_span(&self, span: &ByteSpan) -> bool {
        self.spans.iter().any(|s| s.same_storage(span))
    }

    /// Copy of the unsent bytes (diagnostics and tests).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_unsent_length());
        for span in self.unsent() {
            out.extend_from_slice(span.data());
        }
        out
    }

    fn skip_empty(&mut self) {
        while self.head < self.spans.len() && self.spans[self.head].is_empty() {
            self.head += 1;
        }
    }
}

impl From<Vec<ByteSpan>> for BufferChain {
    fn from(spans: Vec<ByteSpan>) -> Self {
        Self::from_spans(spans)
    }
}
