// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chain-backed queued message.

use std::io::IoSlice;
use std::sync::Arc;

use super::{object_size, MessageCore, QueuedMessage};
use crate::alloc::{AllocError, SharedAllocator};
use crate::buffer::{BufferChain, ByteSpan};
use crate::lf::LeaderFollower;

/// Where the bytes of a [`SynchMessage`] live.
#[derive(Debug)]
enum Contents {
    /// The message owns the chain; nobody else writes these blocks.
    Owned(BufferChain),
    /// The chain views a lender's blocks; only valid until the lender resets.
    Borrowed(BufferChain),
}

impl Contents {
    fn chain(&self) -> &BufferChain {
        match self {
            Contents::Owned(chain) | Contents::Borrowed(chain) => chain,
        }
    }

    fn chain_mut(&mut self) -> &mut BufferChain {
        match self {
            Contents::Owned(chain) | Contents::Borrowed(chain) => chain,
        }
    }
}

/// Queued message over a [`BufferChain`].
///
/// A synchronous send queues a *borrowed* message over the output stream's
/// lent chain; if the send returns before the message is fully written, the
/// transport calls [`copy_if_necessary`](QueuedMessage::copy_if_necessary)
/// so the message stops referencing the stream's blocks.
#[derive(Debug)]
pub struct SynchMessage {
    core: MessageCore,
    contents: Contents,
}

impl SynchMessage {
    /// Message that owns `chain`.
    pub fn owned(chain: BufferChain, leader_follower: Arc<LeaderFollower>) -> Self {
        Self {
            core: MessageCore::new(leader_follower),
            contents: Contents::Owned(chain),
        }
    }

    /// Message that views a lender's blocks through `chain`.
    pub fn borrowed(chain: BufferChain, leader_follower: Arc<LeaderFollower>) -> Self {
        Self {
            core: MessageCore::new(leader_follower),
            contents: Contents::Borrowed(chain),
        }
    }

    /// Owning message whose object slot, and later copies, come from `allocator`.
    pub fn owned_in(
        chain: BufferChain,
        leader_follower: Arc<LeaderFollower>,
        allocator: &SharedAllocator,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            core: MessageCore::pooled(leader_follower, allocator, object_size::<Self>())?,
            contents: Contents::Owned(chain),
        })
    }

    /// The chain being transmitted.
    pub fn chain(&self) -> &BufferChain {
        self.contents.chain()
    }
}

impl QueuedMessage for SynchMessage {
    fn core(&self) -> &MessageCore {
        &self.core
    }

    fn current_block(&self) -> Option<&ByteSpan> {
        self.contents.chain().current_span()
    }

    fn message_length(&self) -> usize {
        self.contents.chain().total_unsent_length()
    }

    fn fill_iov<'a>(&'a self, iov_max: usize, iov: &mut Vec<IoSlice<'a>>) {
        self.contents.chain().fill_iov(iov_max, iov);
    }

    fn bytes_transferred(&mut self, count: usize) -> usize {
        let unsent = self.contents.chain().total_unsent_length();
        let chain = self.contents.chain_mut();
        self.core.transfer(count, unsent, |n| chain.advance_by(n))
    }

    fn clone_message(&self, allocator: Option<&SharedAllocator>) -> Option<Box<dyn QueuedMessage>> {
        let chain = match self.contents.chain().clone_unsent(allocator) {
            Ok(chain) => chain,
            Err(e) => {
                log::debug!("[message] clone failed: {}", e);
                return None;
            }
        };
        let core = self.core.for_clone(allocator, object_size::<Self>())?;

        Some(Box::new(SynchMessage {
            core,
            contents: Contents::Owned(chain),
        }))
    }

    fn copy_if_necessary(&mut self, reference: &BufferChain) -> Result<(), AllocError> {
        let Contents::Borrowed(chain) = &self.contents else {
            return Ok(());
        };
        let Some(current) = chain.current_span() else {
            return Ok(());
        };
        if !reference.contains_span(current) {
            return Ok(());
        }

        let copy = chain.clone_unsent(self.core.allocator())?;
        log::debug!(
            "[message] detached {} unsent bytes from their lender",
            copy.total_unsent_length()
        );
        self.contents = Contents::Owned(copy);
        Ok(())
    }

    fn owns_buffer(&self) -> bool {
        matches!(self.contents, Contents::Owned(_))
    }

    fn destroy(self: Box<Self>) {
        let SynchMessage { mut core, contents } = *self;
        log::trace!(
            "[message] destroying {} message in state {}",
            if matches!(contents, Contents::Owned(_)) { "owned" } else { "borrowed" },
            core.event.state()
        );
        drop(contents);
        core.release_slot();
    }
}
