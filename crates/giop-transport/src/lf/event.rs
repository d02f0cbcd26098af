// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-message completion event.
//!
//! An [`LfEvent`] moves from `Idle` through `Active` to exactly one final
//! state. The first final transition wins; anything reported afterwards is
//! ignored, so a follower blocked on the event observes the outcome once.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use super::leader_follower::LeaderFollower;

/// Completion signal codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LfState {
    /// Created, not yet handed to a writer
    Idle = 0,
    /// A writer is transmitting the message
    Active = 1,
    /// Every byte reached the connection
    Success = 2,
    /// The write failed
    Failure = 3,
    /// The message expired before it was sent
    Timeout = 4,
    /// The connection was closed with the message still queued
    Cancelled = 5,
}

impl LfState {
    /// Whether this state ends the event.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            LfState::Success | LfState::Failure | LfState::Timeout | LfState::Cancelled
        )
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => LfState::Idle,
            1 => LfState::Active,
            2 => LfState::Success,
            3 => LfState::Failure,
            4 => LfState::Timeout,
            _ => LfState::Cancelled,
        }
    }
}

impl fmt::Display for LfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LfState::Idle => "Idle",
            LfState::Active => "Active",
            LfState::Success => "Success",
            LfState::Failure => "Failure",
            LfState::Timeout => "Timeout",
            LfState::Cancelled => "Cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Completion event shared between a queued message and its waiters.
#[derive(Debug)]
pub struct LfEvent {
    state: AtomicU8,
}

impl LfEvent {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LfState::Idle as u8),
        }
    }

    pub fn state(&self) -> LfState {
        LfState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_final(&self) -> bool {
        self.state().is_final()
    }

    pub fn successful(&self) -> bool {
        self.state() == LfState::Success
    }

    /// Final and not successful.
    pub fn error_detected(&self) -> bool {
        let state = self.state();
        state.is_final() && state != LfState::Success
    }

    /// Record a transition and, for final states, wake the waiters
    /// registered with `leader_follower`.
    ///
    /// Returns `false` when the event had already reached a final state; the
    /// new state is then discarded and nobody is notified.
    pub fn state_changed(&self, new_state: LfState, leader_follower: &LeaderFollower) -> bool {
        if !self.transition(new_state) {
            return false;
        }
        if new_state.is_final() {
            leader_follower.notify_completion();
        }
        true
    }

    /// Record a non-final transition without notifying anyone.
    ///
    /// Final states must go through [`state_changed`](Self::state_changed).
    pub(crate) fn mark_active(&self) -> bool {
        self.transition(LfState::Active)
    }

    fn transition(&self, new_state: LfState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if LfState::from_raw(current).is_final() {
                log::trace!(
                    "[lf] ignoring {} on event already {}",
                    new_state,
                    LfState::from_raw(current)
                );
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                new_state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for LfEvent {
    fn default() -> Self {
        Self::new()
    }
}
