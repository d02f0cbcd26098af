// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::{self, IoSlice, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use giop_transport::{Allocator, Block, ByteStream, HeapAllocator, ShutdownHandle};
use parking_lot::{Condvar, Mutex};

/// Stream that accepts a random number of bytes per write.
#[derive(Clone)]
pub struct ShortWriteStream {
    written: Arc<Mutex<Vec<u8>>>,
    rng: Arc<Mutex<fastrand::Rng>>,
    max_write: usize,
    would_block_percent: u8,
    open: Arc<Mutex<bool>>,
}

impl ShortWriteStream {
    pub fn new(seed: u64, max_write: usize) -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            rng: Arc::new(Mutex::new(fastrand::Rng::with_seed(seed))),
            max_write: max_write.max(1),
            would_block_percent: 0,
            open: Arc::new(Mutex::new(true)),
        }
    }

    /// Also answer WouldBlock on roughly `percent` of the writes.
    pub fn with_would_block(mut self, percent: u8) -> Self {
        self.would_block_percent = percent.min(90);
        self
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

impl Write for ShortWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_vectored(&[IoSlice::new(buf)])
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        if !*self.open.lock() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        }

        let mut rng = self.rng.lock();
        if rng.u8(0..100) < self.would_block_percent {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
        }

        let mut budget = rng.usize(1..=self.max_write);
        let mut written = self.written.lock();
        let mut total = 0;
        for buf in bufs {
            let n = buf.len().min(budget);
            written.extend_from_slice(&buf[..n]);
            budget -= n;
            total += n;
            if budget == 0 {
                break;
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for ShortWriteStream {
    fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> {
        *self.open.lock() = false;
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 2809)))
    }

    fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(None)
    }
}

/// Stream whose writes block until it is shut down, like a socket whose
/// peer stopped reading. Writers give up after ten seconds regardless.
#[derive(Clone, Default)]
pub struct StalledStream {
    shut: Arc<(Mutex<bool>, Condvar)>,
    blocked: Arc<AtomicUsize>,
}

impl StalledStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writers currently blocked.
    pub fn blocked_writers(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    fn shut_down(&self) {
        let (lock, condvar) = &*self.shut;
        *lock.lock() = true;
        condvar.notify_all();
    }
}

impl Write for StalledStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_vectored(&[IoSlice::new(buf)])
    }

    fn write_vectored(&mut self, _bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let (lock, condvar) = &*self.shut;
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut shut = lock.lock();

        self.blocked.fetch_add(1, Ordering::SeqCst);
        while !*shut {
            if condvar.wait_until(&mut shut, deadline).timed_out() {
                break;
            }
        }
        self.blocked.fetch_sub(1, Ordering::SeqCst);

        Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream shut down"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ShutdownHandle for StalledStream {
    fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
        self.shut_down();
        Ok(())
    }
}

impl ByteStream for StalledStream {
    fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> {
        self.shut_down();
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 2809)))
    }

    fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(None)
    }

    fn shutdown_handle(&self) -> io::Result<Box<dyn ShutdownHandle>> {
        Ok(Box::new(self.clone()))
    }
}

/// Heap allocator that counts what passes through it.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocations: AtomicUsize,
    frees: AtomicUsize,
    fail_after: Option<usize>,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse every request once `n` allocations succeeded.
    pub fn failing_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after: Some(n),
            ..Self::default()
        })
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.allocations() - self.frees()
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Option<Block> {
        if let Some(limit) = self.fail_after {
            if self.allocations() >= limit {
                return None;
            }
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);
        HeapAllocator.allocate(size)
    }

    fn free(&self, block: Block) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        HeapAllocator.free(block);
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}
