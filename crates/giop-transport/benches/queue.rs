// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::semicolon_if_nothing_returned)] // Benchmark code formatting
#![allow(clippy::unreadable_literal)] // Large test constants
#![allow(clippy::redundant_closure_for_method_calls)] // Test code clarity

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use giop_transport::{
    Allocator, AsynchMessage, BufferChain, ByteSpan, ByteStream, LeaderFollower, MessageType,
    OutputStream, QueuedMessage, SharedAllocator, SlabPool, SynchMessage, Transport,
    TransportConfig,
};
use std::io::{self, IoSlice, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

/// Stream that accepts everything and discards it.
struct Sink;

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Ok(bufs.iter().map(|b| b.len()).sum())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for Sink {
    fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> {
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::from(io::ErrorKind::NotConnected))
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

fn chain_of(spans: usize, span_len: usize) -> BufferChain {
    BufferChain::from_spans((0..spans).map(|_| ByteSpan::from(vec![0x5A; span_len])).collect())
}

// ============================================================================
// Allocator Benchmarks
// ============================================================================

/// Benchmark: SlabPool allocate + free (256B)
/// Target: < 100 ns
fn bench_slab_alloc_free_256b(c: &mut Criterion) {
    c.bench_function("slab_alloc_free_256b", |b| {
        let pool = SlabPool::new();
        b.iter(|| {
            let block = pool.allocate(black_box(256)).unwrap();
            pool.free(block);
        })
    });
}

/// Benchmark: SlabPool allocate + free (4KB)
fn bench_slab_alloc_free_4kb(c: &mut Criterion) {
    c.bench_function("slab_alloc_free_4kb", |b| {
        let pool = SlabPool::new();
        b.iter(|| {
            let block = pool.allocate(black_box(4096)).unwrap();
            pool.free(block);
        })
    });
}

// ============================================================================
// Message Benchmarks
// ============================================================================

/// Benchmark: fill_iov over a 64-span chain with a 16-entry limit
fn bench_fill_iov(c: &mut Criterion) {
    let msg = SynchMessage::owned(chain_of(64, 128), Arc::new(LeaderFollower::new()));
    c.bench_function("fill_iov_64_spans", |b| {
        let mut iov = Vec::with_capacity(16);
        b.iter(|| {
            iov.clear();
            msg.fill_iov(black_box(16), &mut iov);
            black_box(iov.len());
        })
    });
}

/// Benchmark: bytes_transferred in 100-byte steps until complete
fn bench_bytes_transferred(c: &mut Criterion) {
    let lf = Arc::new(LeaderFollower::new());
    c.bench_function("bytes_transferred_8k", |b| {
        b.iter_batched(
            || SynchMessage::owned(chain_of(32, 256), lf.clone()),
            |mut msg| {
                while !msg.all_data_sent() {
                    let step = msg.message_length().min(100);
                    black_box(msg.bytes_transferred(step));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark: clone the unsent remainder of a half-sent message
fn bench_clone_remainder(c: &mut Criterion) {
    let alloc: SharedAllocator = Arc::new(SlabPool::new());
    let mut msg = SynchMessage::owned(chain_of(16, 512), Arc::new(LeaderFollower::new()));
    msg.bytes_transferred(4000);

    c.bench_function("clone_remainder_slab", |b| {
        b.iter(|| {
            let copy = msg.clone_message(Some(&alloc)).unwrap();
            copy.destroy();
        })
    });
}

// ============================================================================
// Transport Benchmarks
// ============================================================================

/// Benchmark: frame and send one request through an idle transport
fn bench_send_giop(c: &mut Criterion) {
    let transport = Transport::new(Sink, TransportConfig::pooled()).unwrap();
    let body = vec![0u8; 1024];
    c.bench_function("send_giop_1kb", |b| {
        b.iter(|| transport.send_giop(MessageType::Request, black_box(&body)).unwrap())
    });
}

/// Benchmark: queue 32 oneway messages, then flush once
fn bench_asynch_batch(c: &mut Criterion) {
    let transport = Transport::new(Sink, TransportConfig::default()).unwrap();
    let lf = transport.leader_follower().clone();
    let payload = [7u8; 200];
    c.bench_function("asynch_batch_32", |b| {
        b.iter(|| {
            for _ in 0..32 {
                let msg = AsynchMessage::new(&payload, lf.clone(), None).unwrap();
                transport.queue_message(Box::new(msg)).unwrap();
            }
            transport.flush().unwrap();
        })
    });
}

/// Benchmark: lend an output stream's chain and reset it
fn bench_output_lend_reset(c: &mut Criterion) {
    let mut out = OutputStream::new(512, None);
    c.bench_function("output_lend_reset", |b| {
        b.iter(|| {
            out.write_bytes(black_box(&[1u8; 700])).unwrap();
            let lent = out.lend();
            drop(black_box(lent));
            out.reset();
        })
    });
}

criterion_group!(
    alloc_benches,
    bench_slab_alloc_free_256b,
    bench_slab_alloc_free_4kb
);

criterion_group!(
    message_benches,
    bench_fill_iov,
    bench_bytes_transferred,
    bench_clone_remainder
);

criterion_group!(
    transport_benches,
    bench_send_giop,
    bench_asynch_batch,
    bench_output_lend_reset
);

criterion_main!(alloc_benches, message_benches, transport_benches);
