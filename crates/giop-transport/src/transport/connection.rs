// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection outbound queue with leader/follower draining.
//!
//! Provides the [`Transport`] type which wraps a [`ByteStream`] with:
//! - A lock-free incoming queue any worker thread can push to
//! - An outbound queue drained by the current leader with vectored writes
//! - Completion signalling for every queued message (exactly once)
//! - Statistics tracking
//!
//! # Flow
//!
//! ```text
//!  workers ──queue_message──> [SegQueue] ──absorb──> [VecDeque] (outbound lock)
//!                                                        │ fill_iov
//!                                                        v
//!                                   leader ── write_vectored ── ByteStream
//!                                                        │ n bytes
//!                                                        v
//!                                     bytes_transferred front to back
//! ```
//!
//! A synchronous send queues a message that *borrows* the caller's output
//! stream. Before the call returns, any queued message still referencing
//! that stream is detached with `copy_if_necessary`, so the caller may reset
//! the stream right away.
//!
//! Whenever a thread gives up leadership it drains whatever was queued while
//! it led, so a oneway message that found leadership taken is not left
//! waiting for the next send.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::{self, IoSlice, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use super::byte_stream::{ByteStream, ShutdownHandle};
use crate::alloc::{AllocError, SharedAllocator};
use crate::buffer::{BufferChain, OutputStream};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::giop::MessageType;
use crate::lf::{LeaderFollower, LeaderGuard, LfEvent, LfState, WaitOutcome};
use crate::message::{AsynchMessage, MessageState, QueuedMessage, SynchMessage};

/// Pause before a leader retries a stream that returned WouldBlock.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_micros(200);

thread_local! {
    /// Set while this thread runs the leadership release hook.
    static DRAINING_LEFTOVERS: Cell<bool> = const { Cell::new(false) };
}

// ============================================================================
// Flush Result
// ============================================================================

/// Result of a drain attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushResult {
    /// All queued data was sent
    Complete,

    /// Some data remains in the queue (would block)
    WouldBlock,

    /// Queue is empty, nothing to flush
    Empty,

    /// Another thread leads and is draining the queue
    Deferred,
}

// ============================================================================
// Transport Statistics
// ============================================================================

/// Statistics for one transport.
#[derive(Clone, Debug, Default)]
pub struct TransportStats {
    /// Messages moved into the outbound queue
    pub messages_queued: u64,

    /// Messages whose last byte was written
    pub messages_sent: u64,

    /// Total bytes written to the stream
    pub bytes_sent: u64,

    /// Vectored write calls that accepted data
    pub writes: u64,

    /// Writes that accepted fewer bytes than offered
    pub partial_sends: u64,

    /// Messages dropped unsent after their deadline
    pub expired: u64,

    /// Messages cancelled by `close`
    pub cancelled: u64,

    /// Messages failed by a write error
    pub failed: u64,

    /// Time of last successful write
    pub last_send_time: Option<Instant>,
}

struct Outbound<S> {
    stream: S,
    queue: VecDeque<Box<dyn QueuedMessage>>,
    stats: TransportStats,
}

/// State reachable from the leadership release hook.
struct Shared<S: ByteStream> {
    config: TransportConfig,
    allocator: SharedAllocator,
    leader_follower: Arc<LeaderFollower>,
    incoming: SegQueue<Box<dyn QueuedMessage>>,
    outbound: Mutex<Outbound<S>>,
    queued_bytes: AtomicUsize,
    closed: AtomicBool,
}

// ============================================================================
// Transport
// ============================================================================

/// Queued-message transport over one byte stream.
///
/// Share it between threads behind an `Arc`; every method takes `&self`.
pub struct Transport<S: ByteStream> {
    shared: Arc<Shared<S>>,
    shutdown: Option<Box<dyn ShutdownHandle>>,
}

impl Transport<TcpStream> {
    /// Connect to `addr` and wrap the stream.
    pub fn connect(addr: impl ToSocketAddrs, config: TransportConfig) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        match stream.peer_addr() {
            Ok(peer) => log::debug!("[transport] connected to {}", peer),
            Err(e) => log::debug!("[transport] connected, peer address unknown: {}", e),
        }
        Self::new(stream, config)
    }
}

impl<S: ByteStream> Transport<S> {
    /// Wrap `stream`, using the allocator selected by `config`.
    pub fn new(stream: S, config: TransportConfig) -> Result<Self, TransportError> {
        let allocator = config.build_allocator();
        Self::with_allocator(stream, config, allocator)
    }

    /// Wrap `stream` with an explicitly injected allocator.
    ///
    /// The stream is switched to non-blocking mode: a full socket makes the
    /// leader give up the outbound lock instead of sleeping inside a write.
    pub fn with_allocator(
        stream: S,
        config: TransportConfig,
        allocator: SharedAllocator,
    ) -> Result<Self, TransportError> {
        config.validate().map_err(TransportError::InvalidConfig)?;

        if let Err(e) = stream.set_nodelay(config.nodelay) {
            log::debug!("[transport] set_nodelay({}) failed: {}", config.nodelay, e);
        }
        if let Err(e) = stream.set_nonblocking(true) {
            log::debug!("[transport] set_nonblocking failed: {}", e);
        }
        let shutdown = match stream.shutdown_handle() {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::debug!("[transport] no out-of-band shutdown: {}", e);
                None
            }
        };

        log::debug!(
            "[transport] created (iov_max={}, block_size={}, allocator={})",
            config.iov_max,
            config.block_size,
            allocator.name()
        );

        let shared = Arc::new(Shared {
            config,
            allocator,
            leader_follower: Arc::new(LeaderFollower::new()),
            incoming: SegQueue::new(),
            outbound: Mutex::new(Outbound {
                stream,
                queue: VecDeque::new(),
                stats: TransportStats::default(),
            }),
            queued_bytes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&shared);
        shared.leader_follower.set_release_hook(move || {
            if let Some(shared) = weak.upgrade() {
                shared.drain_leftovers();
            }
        });

        Ok(Self { shared, shutdown })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn allocator(&self) -> &SharedAllocator {
        &self.shared.allocator
    }

    pub fn leader_follower(&self) -> &Arc<LeaderFollower> {
        &self.shared.leader_follower
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.outbound.lock().stats.clone()
    }

    /// Unsent bytes held by queued messages.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued_bytes.load(Ordering::Acquire)
    }

    /// Messages waiting to be written.
    pub fn queue_len(&self) -> usize {
        self.shared.outbound.lock().queue.len() + self.shared.incoming.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Output stream sized and backed the way this transport is configured.
    pub fn output_stream(&self) -> OutputStream {
        OutputStream::new(
            self.shared.config.block_size,
            Some(Arc::clone(&self.shared.allocator)),
        )
    }

    // ========================================================================
    // Send operations
    // ========================================================================

    /// Append a message to the queue.
    ///
    /// The message is written by whichever thread leads next. On error it has
    /// already been destroyed with a final state.
    pub fn queue_message(&self, message: Box<dyn QueuedMessage>) -> Result<(), TransportError> {
        self.shared.queue_message(message)
    }

    /// Queue a copy of `payload` and write it if no other thread leads.
    ///
    /// Returns the completion event of the queued message.
    pub fn send_asynch(&self, payload: &[u8]) -> Result<Arc<LfEvent>, TransportError> {
        let message = AsynchMessage::new(
            payload,
            Arc::clone(&self.shared.leader_follower),
            Some(&self.shared.allocator),
        )?;
        self.queue_and_kick(Box::new(message))
    }

    /// Like [`send_asynch`](Self::send_asynch), but the message is dropped
    /// with [`LfState::Timeout`] if writing has not started by `deadline`.
    pub fn send_asynch_until(
        &self,
        payload: &[u8],
        deadline: Instant,
    ) -> Result<Arc<LfEvent>, TransportError> {
        let message = AsynchMessage::new(
            payload,
            Arc::clone(&self.shared.leader_follower),
            Some(&self.shared.allocator),
        )?
        .with_deadline(deadline);
        self.queue_and_kick(Box::new(message))
    }

    /// Queue an independent copy of the unsent part of `message`.
    pub fn queue_clone(&self, message: &dyn QueuedMessage) -> Result<Arc<LfEvent>, TransportError> {
        let copy = message
            .clone_message(Some(&self.shared.allocator))
            .ok_or_else(|| AllocError::new(message.message_length()))?;
        let event = Arc::clone(copy.event());
        self.shared.queue_message(copy)?;
        Ok(event)
    }

    /// Send the message written into `out` and wait for it to complete.
    ///
    /// The queued message borrows `out`'s blocks. When this call returns
    /// (success, timeout or failure), no queued message references `out`
    /// any more, and `out` may be reset.
    pub fn send_synch(&self, out: &OutputStream) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let lent = out.lend();
        let message =
            SynchMessage::borrowed(lent.share(), Arc::clone(&self.shared.leader_follower));
        let event = Arc::clone(message.event());
        self.shared.queue_message(Box::new(message))?;

        let result = self.shared.wait_for_completion(&event);
        if !event.is_final() {
            self.shared.release_lender(&lent, &event);
        }
        result
    }

    /// Frame `body` as a GIOP message of `message_type` and send it
    /// synchronously.
    pub fn send_giop(&self, message_type: MessageType, body: &[u8]) -> Result<(), TransportError> {
        let mut out = self.output_stream();
        out.begin_message(message_type)?;
        out.write_bytes(body)?;
        out.end_message()?;

        let result = self.send_synch(&out);
        out.reset();
        result
    }

    /// Drain the queue if no other thread leads.
    pub fn handle_output(&self) -> Result<FlushResult, TransportError> {
        self.shared.handle_output()
    }

    /// Keep draining until the queue is empty or the stream fails.
    pub fn flush(&self) -> Result<(), TransportError> {
        loop {
            match self.shared.handle_output()? {
                FlushResult::Complete | FlushResult::Empty => return Ok(()),
                FlushResult::WouldBlock | FlushResult::Deferred => {
                    thread::sleep(WRITE_RETRY_BACKOFF);
                }
            }
        }
    }

    /// Shut the stream down and cancel every queued message.
    ///
    /// Each pending message receives [`LfState::Cancelled`] exactly once.
    /// A leader blocked in a write is interrupted through the stream's
    /// shutdown handle. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = &self.shutdown {
            if let Err(e) = handle.shutdown(Shutdown::Both) {
                log::debug!("[transport] shutdown failed: {}", e);
            }
        }

        let mut guard = self.shared.outbound.lock();
        if self.shutdown.is_none() {
            if let Err(e) = guard.stream.shutdown(Shutdown::Both) {
                log::debug!("[transport] shutdown failed: {}", e);
            }
        }
        let cancelled = self.shared.cancel_locked(&mut guard);
        log::debug!(
            "[transport] closed, {} queued message(s) cancelled",
            cancelled
        );
    }

    fn queue_and_kick(&self, message: Box<dyn QueuedMessage>) -> Result<Arc<LfEvent>, TransportError> {
        let event = Arc::clone(message.event());
        self.shared.queue_message(message)?;
        self.shared.handle_output()?;
        Ok(event)
    }
}

impl<S: ByteStream> Drop for Transport<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: ByteStream> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("queued_bytes", &self.queued_bytes())
            .field("closed", &self.is_closed())
            .field("allocator", &self.shared.allocator.name())
            .field("shutdown_handle", &self.shutdown.is_some())
            .finish()
    }
}

// ============================================================================
// Leader operations
// ============================================================================

impl<S: ByteStream> Shared<S> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn queue_message(&self, message: Box<dyn QueuedMessage>) -> Result<(), TransportError> {
        if self.is_closed() {
            message.state_changed(LfState::Cancelled);
            message.destroy();
            return Err(TransportError::Closed);
        }

        let len = message.message_length();
        let limit = self.config.max_queued_bytes;
        let reserved = self
            .queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (limit == 0 || queued + len <= limit).then_some(queued + len)
            });
        if let Err(queued) = reserved {
            log::debug!(
                "[transport] rejecting {} byte message, {} of {} bytes queued",
                len,
                queued,
                limit
            );
            message.state_changed(LfState::Failure);
            message.destroy();
            return Err(TransportError::QueueFull { queued, limit });
        }

        self.incoming.push(message);

        // close() may have drained the incoming queue between the check above
        // and the push.
        if self.is_closed() {
            let mut guard = self.outbound.lock();
            self.cancel_locked(&mut guard);
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn handle_output(&self) -> Result<FlushResult, TransportError> {
        match self.leader_follower.elect_leader() {
            Some(guard) => self.drain(&guard),
            None => Ok(FlushResult::Deferred),
        }
    }

    /// Release hook: write what was queued by threads that found leadership
    /// taken. Guards dropped inside this loop return at once; the loop
    /// itself re-checks the incoming queue.
    fn drain_leftovers(&self) {
        if DRAINING_LEFTOVERS.with(|flag| flag.replace(true)) {
            return;
        }

        while !self.is_closed() && !self.incoming.is_empty() {
            match self.handle_output() {
                Ok(FlushResult::Complete | FlushResult::Empty) => {}
                Ok(_) => break,
                Err(e) => {
                    log::debug!("[transport] draining after leader change failed: {}", e);
                    break;
                }
            }
        }

        DRAINING_LEFTOVERS.with(|flag| flag.set(false));
    }

    fn wait_for_completion(&self, event: &LfEvent) -> Result<(), TransportError> {
        let deadline = self.config.send_timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match self.leader_follower.wait_for_event(event, remaining) {
                WaitOutcome::Completed(state) => return completion_result(state),
                WaitOutcome::TimedOut => return Err(TransportError::Timeout),
                WaitOutcome::Lead(guard) => {
                    if self.drain(&guard)? == FlushResult::WouldBlock {
                        drop(guard);
                        thread::sleep(WRITE_RETRY_BACKOFF);
                    }
                }
            }
        }
    }

    /// Write queued messages until the queue is empty or the stream stalls.
    fn drain(&self, _leader: &LeaderGuard<'_>) -> Result<FlushResult, TransportError> {
        let mut guard = self.outbound.lock();
        let outbound = &mut *guard;

        if self.is_closed() {
            self.cancel_locked(outbound);
            return Err(TransportError::Closed);
        }

        self.absorb_incoming(outbound);
        if outbound.queue.is_empty() {
            return Ok(FlushResult::Empty);
        }

        loop {
            self.absorb_incoming(outbound);
            self.discard_expired(outbound);
            self.distribute(outbound, 0);
            if outbound.queue.is_empty() {
                if let Err(e) = outbound.stream.flush() {
                    log::debug!("[transport] flush failed: {}", e);
                }
                return Ok(FlushResult::Complete);
            }

            let (result, offered) = {
                let Outbound { stream, queue, .. } = &mut *outbound;
                let mut iov: Vec<IoSlice<'_>> = Vec::with_capacity(queue.len().min(self.config.iov_max));
                for message in queue.iter() {
                    if iov.len() >= self.config.iov_max {
                        break;
                    }
                    message.fill_iov(self.config.iov_max, &mut iov);
                }
                let offered: usize = iov.iter().map(|v| v.len()).sum();
                (stream.write_vectored(&iov), offered)
            };

            match result {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "connection closed");
                    return Err(self.stream_failed(outbound, err));
                }
                Ok(n) => {
                    let stats = &mut outbound.stats;
                    stats.bytes_sent += n as u64;
                    stats.writes += 1;
                    stats.last_send_time = Some(Instant::now());
                    if n < offered {
                        stats.partial_sends += 1;
                    }
                    log::trace!("[transport] wrote {} of {} bytes", n, offered);
                    self.distribute(outbound, n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushResult::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.stream_failed(outbound, e)),
            }
        }
    }

    /// Report `n` written bytes to the queue front to back, retiring every
    /// message that has nothing left.
    fn distribute(&self, outbound: &mut Outbound<S>, n: usize) {
        let mut left = n;

        while let Some(front) = outbound.queue.front_mut() {
            if front.all_data_sent() {
                front.state_changed(LfState::Success);
                if let Some(done) = outbound.queue.pop_front() {
                    outbound.stats.messages_sent += 1;
                    done.destroy();
                }
                continue;
            }
            if left == 0 {
                break;
            }
            left = front.bytes_transferred(left);
        }

        debug_assert_eq!(left, 0, "write reported more bytes than were queued");
        self.queued_bytes.fetch_sub(n - left, Ordering::AcqRel);
    }

    /// Drop messages whose deadline passed before their first byte was written.
    fn discard_expired(&self, outbound: &mut Outbound<S>) {
        let now = Instant::now();
        let mut i = 0;

        while i < outbound.queue.len() {
            let message = &outbound.queue[i];
            if !(message.message_state() == MessageState::Pending && message.is_expired(now)) {
                i += 1;
                continue;
            }
            if let Some(expired) = outbound.queue.remove(i) {
                self.queued_bytes
                    .fetch_sub(expired.message_length(), Ordering::AcqRel);
                expired.state_changed(LfState::Timeout);
                outbound.stats.expired += 1;
                log::debug!(
                    "[transport] dropping expired message ({} bytes)",
                    expired.message_length()
                );
                expired.destroy();
            }
        }
    }

    fn absorb_incoming(&self, outbound: &mut Outbound<S>) {
        while let Some(message) = self.incoming.pop() {
            outbound.stats.messages_queued += 1;
            outbound.queue.push_back(message);
        }
    }

    /// Cancel everything queued. Returns the number of messages cancelled.
    fn cancel_locked(&self, outbound: &mut Outbound<S>) -> usize {
        self.retire_all(outbound, LfState::Cancelled)
    }

    /// A write that fails after `close()` is the shutdown taking effect, so
    /// the queue is cancelled rather than failed.
    fn stream_failed(&self, outbound: &mut Outbound<S>, err: io::Error) -> TransportError {
        if self.is_closed() {
            log::debug!("[transport] write interrupted by close: {}", err);
            self.cancel_locked(outbound);
            return TransportError::Closed;
        }
        self.fail_locked(outbound, &err);
        err.into()
    }

    fn fail_locked(&self, outbound: &mut Outbound<S>, err: &io::Error) {
        self.closed.store(true, Ordering::Release);
        let failed = self.retire_all(outbound, LfState::Failure);
        log::warn!(
            "[transport] write failed: {}; failed {} queued message(s)",
            err,
            failed
        );
        if let Ok(Some(pending)) = outbound.stream.take_error() {
            log::debug!("[transport] pending socket error: {}", pending);
        }
        if let Err(e) = outbound.stream.shutdown(Shutdown::Both) {
            log::debug!("[transport] shutdown after failure: {}", e);
        }
    }

    fn retire_all(&self, outbound: &mut Outbound<S>, state: LfState) -> usize {
        self.absorb_incoming(outbound);

        let mut retired = 0;
        while let Some(message) = outbound.queue.pop_front() {
            self.queued_bytes
                .fetch_sub(message.message_length(), Ordering::AcqRel);
            message.state_changed(state);
            message.destroy();
            retired += 1;
        }

        match state {
            LfState::Cancelled => outbound.stats.cancelled += retired as u64,
            _ => outbound.stats.failed += retired as u64,
        }
        retired
    }

    /// Detach queued messages from a lender whose send call is returning.
    ///
    /// The sender's own message is withdrawn if no byte of it was written;
    /// otherwise it stays queued (the peer already saw part of it) and
    /// takes a private copy of its remainder.
    fn release_lender(&self, lent: &BufferChain, event: &Arc<LfEvent>) {
        let mut guard = self.outbound.lock();
        let outbound = &mut *guard;
        self.absorb_incoming(outbound);

        let position = outbound
            .queue
            .iter()
            .position(|m| Arc::ptr_eq(m.event(), event));
        if let Some(pos) = position {
            if outbound.queue[pos].message_state() == MessageState::Pending {
                if let Some(withdrawn) = outbound.queue.remove(pos) {
                    self.queued_bytes
                        .fetch_sub(withdrawn.message_length(), Ordering::AcqRel);
                    withdrawn.state_changed(LfState::Timeout);
                    outbound.stats.expired += 1;
                    withdrawn.destroy();
                }
            }
        }

        for message in outbound.queue.iter_mut() {
            if let Err(e) = message.copy_if_necessary(lent) {
                // The message keeps sharing the lender's blocks; the lender
                // will leave them alone on reset.
                log::warn!("[transport] could not detach queued message: {}", e);
            }
        }
    }
}

fn completion_result(state: LfState) -> Result<(), TransportError> {
    match state {
        LfState::Success => Ok(()),
        LfState::Timeout => Err(TransportError::Timeout),
        LfState::Cancelled => Err(TransportError::Closed),
        other => Err(TransportError::Failed(other)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{Allocator, SlabPool};
    use crate::buffer::ByteSpan;
    use crate::config::AllocatorKind;
    use crate::giop::{GiopHeader, GIOP_HEADER_SIZE};
    use crate::transport::byte_stream::mock::MockStream;

    fn transport(stream: MockStream) -> Transport<MockStream> {
        Transport::new(stream, TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Transport::new(MockStream::new(), TransportConfig::default().with_iov_max(0));
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }

    #[test]
    fn test_asynch_written_immediately() {
        let stream = MockStream::new();
        let transport = transport(stream.clone());

        let event = transport.send_asynch(b"oneway").unwrap();
        assert_eq!(event.state(), LfState::Success);
        assert_eq!(stream.written(), b"oneway");
        assert_eq!(transport.queued_bytes(), 0);

        let stats = transport.stats();
        assert_eq!(stats.messages_queued, 1);
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, 6);
    }

    #[test]
    fn test_short_writes_resume() {
        let stream = MockStream::new().with_max_write(3);
        let transport = transport(stream.clone());

        for payload in [&b"first-"[..], b"second-", b"third"] {
            let msg = AsynchMessage::new(payload, transport.leader_follower().clone(), None).unwrap();
            transport.queue_message(Box::new(msg)).unwrap();
        }
        transport.flush().unwrap();

        assert_eq!(stream.written(), b"first-second-third");
        let stats = transport.stats();
        assert_eq!(stats.messages_sent, 3);
        assert!(stats.partial_sends > 0);
    }

    #[test]
    fn test_one_write_spans_messages() {
        let stream = MockStream::new();
        let transport = transport(stream.clone());

        let lf = transport.leader_follower().clone();
        let a = AsynchMessage::new(b"aa", lf.clone(), None).unwrap();
        let b = SynchMessage::owned(BufferChain::from_slice(b"bbb"), lf.clone());
        let (ea, eb) = (a.event().clone(), b.event().clone());
        transport.queue_message(Box::new(a)).unwrap();
        transport.queue_message(Box::new(b)).unwrap();

        assert_eq!(transport.handle_output().unwrap(), FlushResult::Complete);
        assert_eq!(stream.write_calls(), 1);
        assert!(ea.successful());
        assert!(eb.successful());
    }

    #[test]
    fn test_iov_max_limits_one_write() {
        let stream = MockStream::new();
        let config = TransportConfig::default().with_iov_max(2);
        let transport = Transport::new(stream.clone(), config).unwrap();

        let chain = BufferChain::from_spans(vec![
            ByteSpan::from(&b"a"[..]),
            ByteSpan::from(&b"b"[..]),
            ByteSpan::from(&b"c"[..]),
        ]);
        let msg = SynchMessage::owned(chain, transport.leader_follower().clone());
        transport.queue_message(Box::new(msg)).unwrap();
        transport.flush().unwrap();

        assert_eq!(stream.written(), b"abc");
        assert_eq!(stream.write_calls(), 2);
    }

    #[test]
    fn test_would_block_keeps_queue() {
        let stream = MockStream::new().with_would_block(1);
        let transport = transport(stream.clone());

        let event = transport.send_asynch(b"later").unwrap();
        assert_eq!(event.state(), LfState::Idle);
        assert_eq!(transport.queue_len(), 1);

        assert_eq!(transport.handle_output().unwrap(), FlushResult::Complete);
        assert!(event.successful());
        assert_eq!(stream.written(), b"later");
    }

    #[test]
    fn test_write_error_fails_messages() {
        let stream = MockStream::new().with_write_error(io::ErrorKind::ConnectionReset);
        let transport = transport(stream);

        let err = transport.send_asynch(b"doomed").unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(transport.is_closed());
        assert_eq!(transport.stats().failed, 1);
        assert_eq!(transport.queued_bytes(), 0);
    }

    #[test]
    fn test_close_cancels_once() {
        let stream = MockStream::new().with_would_block(usize::MAX);
        let transport = transport(stream);

        let events: Vec<_> = (0..3)
            .map(|i| transport.send_asynch(&[i; 4]).unwrap())
            .collect();
        transport.close();
        transport.close();

        for event in &events {
            assert_eq!(event.state(), LfState::Cancelled);
        }
        assert_eq!(transport.stats().cancelled, 3);
        assert_eq!(transport.leader_follower().completions(), 3);
        assert!(matches!(
            transport.send_asynch(b"late"),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_queue_limit() {
        let stream = MockStream::new().with_would_block(usize::MAX);
        let config = TransportConfig::default().with_max_queued_bytes(8);
        let transport = Transport::new(stream, config).unwrap();

        transport.send_asynch(b"12345").unwrap();
        let err = transport.send_asynch(b"67890").unwrap_err();
        assert!(matches!(
            err,
            TransportError::QueueFull {
                queued: 5,
                limit: 8
            }
        ));
        assert_eq!(transport.queued_bytes(), 5);
    }

    #[test]
    fn test_expired_message_dropped() {
        let stream = MockStream::new().with_would_block(1);
        let transport = transport(stream.clone());

        let stale = transport
            .send_asynch_until(b"stale", Instant::now())
            .unwrap();
        let fresh = transport.send_asynch(b"fresh").unwrap();
        transport.flush().unwrap();

        assert_eq!(stale.state(), LfState::Timeout);
        assert!(fresh.successful());
        assert_eq!(stream.written(), b"fresh");
        assert_eq!(transport.stats().expired, 1);
    }

    #[test]
    fn test_send_giop_frames_message() {
        let stream = MockStream::new();
        let transport = transport(stream.clone());

        transport.send_giop(MessageType::Request, b"body").unwrap();

        let bytes = stream.written();
        let header = GiopHeader::decode(&bytes).unwrap();
        assert_eq!(header.message_type, MessageType::Request);
        assert_eq!(header.message_size, 4);
        assert_eq!(&bytes[GIOP_HEADER_SIZE..], b"body");
    }

    #[test]
    fn test_synch_timeout_detaches_partial_message() {
        let pool = Arc::new(SlabPool::new());
        let shared: SharedAllocator = pool.clone();
        let stream = MockStream::new().with_max_write(4);
        let config = TransportConfig::default()
            .with_allocator(AllocatorKind::Slab)
            .with_send_timeout(Duration::from_millis(200));
        let transport = Transport::with_allocator(stream.clone(), config, shared).unwrap();

        // Another thread holds leadership, so the sender can only wait.
        let lf = transport.leader_follower().clone();
        let guard = lf.elect_leader().unwrap();

        let mut out = transport.output_stream();
        out.write_bytes(b"0123456789").unwrap();

        // Simulate the leader having written the first bytes of the message.
        let result = thread::scope(|s| {
            let sender = s.spawn(|| transport.send_synch(&out));
            while lf.follower_count() == 0 {
                thread::yield_now();
            }
            {
                let shared = &transport.shared;
                let mut outbound = shared.outbound.lock();
                shared.absorb_incoming(&mut outbound);
                shared.distribute(&mut outbound, 0);
                let front = outbound.queue.front_mut().unwrap();
                front.bytes_transferred(4);
                shared.queued_bytes.fetch_sub(4, Ordering::AcqRel);
            }
            sender.join().unwrap()
        });
        assert!(matches!(result, Err(TransportError::Timeout)));

        out.reset();
        assert_eq!(out.stats().abandoned, 0);

        drop(guard);
        transport.flush().unwrap();
        assert_eq!(stream.written(), b"456789");
        assert!(pool.allocate(8).is_some());
    }

    #[test]
    fn test_stream_switched_to_nonblocking() {
        let stream = MockStream::new();
        let _transport = transport(stream.clone());
        assert!(stream.is_nonblocking());
    }

    #[test]
    fn test_oneway_written_when_leader_steps_down() {
        let stream = MockStream::new();
        let transport = transport(stream.clone());

        let lf = transport.leader_follower().clone();
        let guard = lf.elect_leader().unwrap();

        let event = transport.send_asynch(b"oneway").unwrap();
        assert_eq!(event.state(), LfState::Idle);
        assert_eq!(transport.queue_len(), 1);

        drop(guard);

        assert!(event.successful());
        assert_eq!(transport.queue_len(), 0);
        assert_eq!(stream.written(), b"oneway");
        assert!(!lf.has_leader());
    }

    #[test]
    fn test_synch_timeout_before_first_byte_withdraws_message() {
        let stream = MockStream::new();
        let config = TransportConfig::default().with_send_timeout(Duration::from_millis(50));
        let transport = Transport::new(stream.clone(), config).unwrap();

        let lf = transport.leader_follower().clone();
        let guard = lf.elect_leader().unwrap();

        let mut out = transport.output_stream();
        out.begin_message(MessageType::Request).unwrap();
        out.write_bytes(b"never sent").unwrap();
        out.end_message().unwrap();

        let result = transport.send_synch(&out);
        assert!(matches!(result, Err(TransportError::Timeout)));

        // The only final transition was the withdrawal with TIMEOUT.
        assert_eq!(lf.completions(), 1);
        let stats = transport.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(transport.queue_len(), 0);
        assert_eq!(transport.queued_bytes(), 0);

        out.reset();
        assert_eq!(out.stats().abandoned, 0);

        drop(guard);
        transport.flush().unwrap();
        assert!(stream.written().is_empty());
        assert_eq!(stream.write_calls(), 0);
    }

    #[test]
    fn test_close_uses_shutdown_handle() {
        let stream = MockStream::new().with_would_block(usize::MAX);
        let transport = transport(stream.clone());

        let event = transport.send_asynch(b"stuck").unwrap();
        transport.close();

        assert!(!stream.is_connected());
        assert_eq!(event.state(), LfState::Cancelled);
        assert_eq!(transport.stats().failed, 0);
    }
}
