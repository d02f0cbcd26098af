// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queued messages: transmission units with a send cursor.
//!
//! A queued message wraps the bytes of one request or reply and remembers
//! how far they have been written. The connection leader repeatedly asks the
//! queue for scatter-gather vectors ([`QueuedMessage::fill_iov`]), writes
//! them, and reports the byte count back ([`QueuedMessage::bytes_transferred`]).
//! When the last byte is reported the message fires its completion event with
//! [`LfState::Success`].
//!
//! # Variants
//!
//! - [`SynchMessage`] - chain backed, either owning its chain or borrowing
//!   the lender's blocks for the duration of a synchronous send
//! - [`AsynchMessage`] - one contiguous owned copy, optionally with a deadline
//!
//! # Lifecycle
//!
//! ```text
//!  Pending ──bytes_transferred(k)──> PartiallySent ──...──> Complete
//!     └──────────────bytes_transferred(n)───────────────────────┘
//! ```
//!
//! [`QueuedMessage::destroy`] is the only sanctioned end of life: it releases
//! the message's buffers and returns its pool slot.

pub mod asynch;
pub mod synch;

pub use asynch::AsynchMessage;
pub use synch::SynchMessage;

use std::fmt;
use std::io::IoSlice;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use crate::alloc::{AllocError, Allocator, BlockLease, SharedAllocator};
use crate::buffer::{BufferChain, ByteSpan};
use crate::lf::{LeaderFollower, LfEvent, LfState};

/// Transmission progress of a queued message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// No byte written yet
    Pending,
    /// Some bytes written, some left
    PartiallySent,
    /// Every byte written (terminal)
    Complete,
}

/// A transmission unit held in a transport's outbound queue.
///
/// Only the connection leader mutates a queued message; the transport
/// enforces this by keeping the queue behind its outbound lock.
pub trait QueuedMessage: Send + fmt::Debug {
    /// Bookkeeping shared by every variant.
    fn core(&self) -> &MessageCore;

    /// Span holding the first unsent byte, `None` when nothing is left.
    fn current_block(&self) -> Option<&ByteSpan>;

    /// Unsent bytes.
    fn message_length(&self) -> usize;

    fn all_data_sent(&self) -> bool {
        self.message_length() == 0
    }

    /// Append this message's unsent ranges to `iov`, stopping once it holds
    /// `iov_max` entries. Zero-length ranges are never appended.
    fn fill_iov<'a>(&'a self, iov_max: usize, iov: &mut Vec<IoSlice<'a>>);

    /// Consume the part of `count` that belongs to this message.
    ///
    /// Returns the bytes left over for the messages queued behind this one.
    /// `0` is a no-op. Fires [`LfState::Success`] once, when the last byte is
    /// consumed.
    fn bytes_transferred(&mut self, count: usize) -> usize;

    /// Independent message holding a deep copy of the unsent remainder.
    ///
    /// The copy and its buffer come from `allocator` (heap when `None`) and
    /// carry a fresh completion event. Returns `None` when allocation fails.
    fn clone_message(&self, allocator: Option<&SharedAllocator>) -> Option<Box<dyn QueuedMessage>>;

    /// Detach from a lender that is about to reuse its blocks.
    ///
    /// When the message borrows its bytes and `reference` still holds the
    /// current span, the unsent remainder is copied and the message takes
    /// ownership of the copy. Otherwise nothing happens.
    fn copy_if_necessary(&mut self, reference: &BufferChain) -> Result<(), AllocError>;

    /// Whether the message owns the storage it transmits.
    fn owns_buffer(&self) -> bool;

    /// Release owned buffers, then the message object itself.
    fn destroy(self: Box<Self>);

    /// Expired messages are discarded before transmission starts.
    fn is_expired(&self, _now: Instant) -> bool {
        false
    }

    /// Completion event observed by the thread that queued the message.
    fn event(&self) -> &Arc<LfEvent> {
        &self.core().event
    }

    /// Report a completion code. Only the first final state is recorded.
    fn state_changed(&self, state: LfState) -> bool {
        let core = self.core();
        core.event.state_changed(state, &core.leader_follower)
    }

    fn message_state(&self) -> MessageState {
        if self.all_data_sent() {
            MessageState::Complete
        } else if self.core().sent > 0 {
            MessageState::PartiallySent
        } else {
            MessageState::Pending
        }
    }
}

/// State common to every queued message.
pub struct MessageCore {
    event: Arc<LfEvent>,
    leader_follower: Arc<LeaderFollower>,
    allocator: Option<SharedAllocator>,
    slot: Option<BlockLease>,
    sent: usize,
}

impl MessageCore {
    /// Core for a message that lives in a plain heap allocation.
    pub fn new(leader_follower: Arc<LeaderFollower>) -> Self {
        Self {
            event: Arc::new(LfEvent::new()),
            leader_follower,
            allocator: None,
            slot: None,
            sent: 0,
        }
    }

    /// Core whose message object occupies an `object_size` slot of `allocator`.
    ///
    /// The slot is returned when the message is destroyed.
    pub fn pooled(
        leader_follower: Arc<LeaderFollower>,
        allocator: &SharedAllocator,
        object_size: usize,
    ) -> Result<Self, AllocError> {
        let slot = BlockLease::allocate(Some(allocator), object_size)?;
        Ok(Self {
            event: Arc::new(LfEvent::new()),
            leader_follower,
            allocator: Some(Arc::clone(allocator)),
            slot: Some(slot),
            sent: 0,
        })
    }

    /// Core for a copy of a message: same coordinator, fresh event.
    fn for_clone(&self, allocator: Option<&SharedAllocator>, object_size: usize) -> Option<Self> {
        let leader_follower = Arc::clone(&self.leader_follower);
        match allocator {
            Some(alloc) => Self::pooled(leader_follower, alloc, object_size).ok(),
            None => Some(Self::new(leader_follower)),
        }
    }

    /// Allocator the message and its buffer return to, if any.
    pub fn allocator(&self) -> Option<&SharedAllocator> {
        self.allocator.as_ref()
    }

    /// Whether the message object holds a pool slot.
    pub fn is_pooled(&self) -> bool {
        self.slot.is_some()
    }

    pub fn leader_follower(&self) -> &Arc<LeaderFollower> {
        &self.leader_follower
    }

    /// Bytes consumed so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Common accounting for `bytes_transferred`: marks the event active,
    /// lets `advance` consume up to `unsent` bytes, and fires SUCCESS when
    /// the message has nothing left.
    fn transfer(&mut self, count: usize, unsent: usize, advance: impl FnOnce(usize)) -> usize {
        if count == 0 {
            return 0;
        }
        debug_assert!(
            unsent > 0,
            "{} bytes reported to an already complete message",
            count
        );
        if unsent == 0 {
            return count;
        }

        self.event.mark_active();
        let used = count.min(unsent);
        advance(used);
        self.sent += used;

        if used == unsent {
            self.event
                .state_changed(LfState::Success, &self.leader_follower);
        }
        count - used
    }

    /// Return the object slot to its pool. Idempotent.
    fn release_slot(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            slot.release();
        }
    }
}

impl Drop for MessageCore {
    fn drop(&mut self) {
        self.release_slot();
    }
}

impl fmt::Debug for MessageCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCore")
            .field("state", &self.event.state())
            .field("sent", &self.sent)
            .field("allocator", &self.allocator.as_ref().map(|a| a.name()))
            .field("pooled", &self.slot.is_some())
            .finish()
    }
}

/// Size reserved in a pool for a message object of type `T`.
pub(crate) fn object_size<T>() -> usize {
    mem::size_of::<T>()
}
