// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Contiguous owned queued message for oneway and non-blocking sends.

use std::io::IoSlice;
use std::sync::Arc;
use std::time::Instant;

use super::{object_size, MessageCore, QueuedMessage};
use crate::alloc::{AllocError, SharedAllocator};
use crate::buffer::{BufferChain, ByteSpan};
use crate::lf::LeaderFollower;

/// Queued message holding its own copy of the payload in one block.
///
/// The sender does not wait for it, so the bytes are copied at construction
/// and the caller's buffers can be reused immediately. An optional deadline
/// lets the transport drop the message if it could not start in time.
#[derive(Debug)]
pub struct AsynchMessage {
    core: MessageCore,
    data: ByteSpan,
    deadline: Option<Instant>,
}

impl AsynchMessage {
    /// Copy `payload` into storage from `allocator` (heap when `None`).
    ///
    /// With an allocator the message object also takes a slot from it.
    pub fn new(
        payload: &[u8],
        leader_follower: Arc<LeaderFollower>,
        allocator: Option<&SharedAllocator>,
    ) -> Result<Self, AllocError> {
        let core = match allocator {
            Some(alloc) => MessageCore::pooled(leader_follower, alloc, object_size::<Self>())?,
            None => MessageCore::new(leader_follower),
        };
        Ok(Self {
            core,
            data: ByteSpan::copy_from(payload, allocator)?,
            deadline: None,
        })
    }

    /// Flatten the unsent part of `chain` into a new message.
    pub fn from_chain(
        chain: &BufferChain,
        leader_follower: Arc<LeaderFollower>,
        allocator: Option<&SharedAllocator>,
    ) -> Result<Self, AllocError> {
        let flat = chain.clone_unsent(allocator)?;
        let data = flat.current_span().cloned().unwrap_or_else(ByteSpan::empty);
        let core = match allocator {
            Some(alloc) => MessageCore::pooled(leader_follower, alloc, object_size::<Self>())?,
            None => MessageCore::new(leader_follower),
        };
        Ok(Self {
            core,
            data,
            deadline: None,
        })
    }

    /// Discard the message if it has not started by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl QueuedMessage for AsynchMessage {
    fn core(&self) -> &MessageCore {
        &self.core
    }

    fn current_block(&self) -> Option<&ByteSpan> {
        (!self.data.is_empty()).then_some(&self.data)
    }

    fn message_length(&self) -> usize {
        self.data.len()
    }

    fn fill_iov<'a>(&'a self, iov_max: usize, iov: &mut Vec<IoSlice<'a>>) {
        if !self.data.is_empty() && iov.len() < iov_max {
            iov.push(IoSlice::new(self.data.data()));
        }
    }

    fn bytes_transferred(&mut self, count: usize) -> usize {
        let unsent = self.data.len();
        let data = &mut self.data;
        self.core.transfer(count, unsent, |n| data.advance(n))
    }

    fn clone_message(&self, allocator: Option<&SharedAllocator>) -> Option<Box<dyn QueuedMessage>> {
        let data = match ByteSpan::copy_from(self.data.data(), allocator) {
            Ok(data) => data,
            Err(e) => {
                log::debug!("[message] clone failed: {}", e);
                return None;
            }
        };
        let core = self.core.for_clone(allocator, object_size::<Self>())?;

        Some(Box::new(AsynchMessage {
            core,
            data,
            deadline: self.deadline,
        }))
    }

    fn copy_if_necessary(&mut self, _reference: &BufferChain) -> Result<(), AllocError> {
        Ok(())
    }

    fn owns_buffer(&self) -> bool {
        true
    }

    fn destroy(self: Box<Self>) {
        let AsynchMessage {
            mut core, data, ..
        } = *self;
        log::trace!(
            "[message] destroying asynch message with {} unsent bytes",
            data.len()
        );
        drop(data);
        core.release_slot();
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
