// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection-level queue manager.
//!
//! ```text
//! +--------------------------------------------------------+
//! |                      Transport<S>                      |
//! |  incoming (SegQueue)  ->  outbound queue (Mutex)       |
//! |        |                        | fill_iov / write     |
//! |  LeaderFollower  <-- signals -- QueuedMessage          |
//! |                                 |                      |
//! |                          ByteStream (TcpStream, ...)   |
//! +--------------------------------------------------------+
//! ```

pub mod byte_stream;
pub mod connection;

pub use byte_stream::{BoxedByteStream, ByteStream, ShutdownHandle};
pub use connection::{FlushResult, Transport, TransportStats};
