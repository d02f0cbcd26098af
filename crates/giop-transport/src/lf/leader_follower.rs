// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Leader/follower coordination for one connection.
//!
//! At most one thread leads: it owns the right to write to the connection
//! and to report progress into queued messages. Other threads that wait for
//! their own message block as followers and are woken whenever any message
//! completes or leadership becomes vacant. A woken follower either finds its
//! event final, takes over leadership, or goes back to sleep.
//!
//! ```text
//!  follower A ──wait──┐                ┌── Completed(Success)
//!  follower B ──wait──┼── notify_all ──┼── Lead(guard)      (leader left)
//!  leader     ──drop(guard)/complete ──┘
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::event::{LfEvent, LfState};

#[derive(Debug, Default)]
struct LfInner {
    leader: Option<ThreadId>,
    followers: usize,
    completions: u64,
}

type ReleaseHook = Box<dyn Fn() + Send + Sync>;

/// Per-connection leader/follower coordinator.
#[derive(Default)]
pub struct LeaderFollower {
    inner: Mutex<LfInner>,
    condvar: Condvar,
    release_hook: OnceLock<ReleaseHook>,
}

/// Result of [`LeaderFollower::wait_for_event`].
#[derive(Debug)]
pub enum WaitOutcome<'a> {
    /// The event reached this final state
    Completed(LfState),
    /// Leadership was vacant; the caller now leads and must drive I/O
    Lead(LeaderGuard<'a>),
    /// The timeout elapsed with the event still pending
    TimedOut,
}

/// Leadership held by the current thread; released on drop.
#[must_use = "leadership is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LeaderGuard<'a> {
    lf: &'a LeaderFollower,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.lf.inner.lock();
        inner.leader = None;
        let followers = inner.followers;
        drop(inner);

        log::trace!("[lf] leadership released ({} follower(s) waiting)", followers);
        self.lf.condvar.notify_all();

        if let Some(hook) = self.lf.release_hook.get() {
            hook();
        }
    }
}

impl LeaderFollower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the action every thread runs right after giving up
    /// leadership, outside the coordinator lock.
    ///
    /// Only the first hook is kept; returns `false` if one was already set.
    pub fn set_release_hook(&self, hook: impl Fn() + Send + Sync + 'static) -> bool {
        self.release_hook.set(Box::new(hook)).is_ok()
    }

    /// Take leadership if nobody holds it.
    pub fn elect_leader(&self) -> Option<LeaderGuard<'_>> {
        let mut inner = self.inner.lock();
        if inner.leader.is_some() {
            return None;
        }
        inner.leader = Some(thread::current().id());
        Some(LeaderGuard { lf: self })
    }

    /// Whether the calling thread is the leader.
    pub fn is_leader(&self) -> bool {
        self.inner.lock().leader == Some(thread::current().id())
    }

    pub fn has_leader(&self) -> bool {
        self.inner.lock().leader.is_some()
    }

    /// Threads currently blocked in `wait_for_event`.
    pub fn follower_count(&self) -> usize {
        self.inner.lock().followers
    }

    /// Number of final transitions reported so far.
    pub fn completions(&self) -> u64 {
        self.inner.lock().completions
    }

    /// Block until `event` is final, leadership is vacant, or `timeout`
    /// elapses (`None` waits indefinitely).
    ///
    /// A final event takes precedence over vacant leadership, so a follower
    /// whose message was completed by the departing leader never has to
    /// lead.
    pub fn wait_for_event(&self, event: &LfEvent, timeout: Option<Duration>) -> WaitOutcome<'_> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        loop {
            let state = event.state();
            if state.is_final() {
                return WaitOutcome::Completed(state);
            }

            if inner.leader.is_none() {
                inner.leader = Some(thread::current().id());
                log::trace!("[lf] follower promoted to leader");
                return WaitOutcome::Lead(LeaderGuard { lf: self });
            }

            inner.followers += 1;
            let timed_out = match deadline {
                Some(deadline) => self.condvar.wait_until(&mut inner, deadline).timed_out(),
                None => {
                    self.condvar.wait(&mut inner);
                    false
                }
            };
            inner.followers -= 1;

            if timed_out {
                let state = event.state();
                if state.is_final() {
                    return WaitOutcome::Completed(state);
                }
                log::debug!("[lf] wait timed out with event {}", state);
                return WaitOutcome::TimedOut;
            }
        }
    }

    /// Wake every follower after an event reached a final state.
    ///
    /// The event state is published before this call takes the lock, so a
    /// follower checking the event under the lock cannot miss the wakeup.
    pub(crate) fn notify_completion(&self) {
        let mut inner = self.inner.lock();
        inner.completions += 1;
        drop(inner);
        self.condvar.notify_all();
    }
}

impl fmt::Debug for LeaderFollower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LeaderFollower")
            .field("leader", &inner.leader)
            .field("followers", &inner.followers)
            .field("completions", &inner.completions)
            .field("release_hook", &self.release_hook.get().is_some())
            .finish()
    }
}
