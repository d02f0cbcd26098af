// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # giop-transport - queued-message transport for a GIOP ORB
//!
//! Frames outbound requests and replies into a queue of transmissible
//! messages, tracks partial delivery over a byte-stream connection, and
//! reclaims buffers safely while several threads send and flush.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use giop_transport::{MessageType, Transport, TransportConfig};
//!
//! fn main() -> Result<(), giop_transport::TransportError> {
//!     let transport = Transport::connect("127.0.0.1:2809", TransportConfig::default())?;
//!
//!     // Blocks until the request is written (or the send timeout elapses).
//!     transport.send_giop(MessageType::Request, b"marshaled request body")?;
//!
//!     // Oneway: copied and queued, written by whichever thread leads.
//!     let event = transport.send_asynch(b"oneway body")?;
//!     println!("oneway state: {}", event.state());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  OutputStream (lender)  --lend()-->  SynchMessage (borrowed chain)  |
//! |  payload bytes          --copy--->   AsynchMessage (owned block)    |
//! +---------------------------------------------------------------------+
//! |  Transport: incoming queue -> outbound queue -> write_vectored      |
//! |             bytes_transferred distributed front to back             |
//! +---------------------------------------------------------------------+
//! |  LeaderFollower + LfEvent: one writer, followers wait on completion |
//! +---------------------------------------------------------------------+
//! |  BufferChain / ByteSpan over BlockLease  <-  Allocator (heap, slab) |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`buffer`] - byte spans, buffer chains and the output stream
//! - [`message`] - the [`QueuedMessage`] trait and its two variants
//! - [`lf`] - completion events and leader/follower coordination
//! - [`alloc`] - allocator capability, heap and slab implementations
//! - [`transport`] - the per-connection queue manager
//! - [`giop`] - the 12-byte GIOP message header

pub mod alloc;
pub mod buffer;
pub mod config;
pub mod error;
pub mod giop;
pub mod lf;
pub mod message;
pub mod transport;

pub use crate::alloc::{AllocError, Allocator, Block, BlockLease, HeapAllocator, SharedAllocator, SlabPool};
pub use buffer::{BufferChain, ByteSpan, OutputStream};
pub use config::{AllocatorKind, TransportConfig};
pub use error::TransportError;
pub use giop::{GiopHeader, GiopVersion, MessageType};
pub use lf::{LeaderFollower, LfEvent, LfState, WaitOutcome};
pub use message::{AsynchMessage, MessageState, QueuedMessage, SynchMessage};
pub use transport::{ByteStream, FlushResult, ShutdownHandle, Transport, TransportStats};
