// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte buffers: spans, chains and the output stream that lends them.
//!
//! - [`ByteSpan`] - consumable window onto reference-counted storage
//! - [`BufferChain`] - ordered spans with a send cursor and scatter-gather export
//! - [`OutputStream`] - block buffer a message is written into, lends chains

pub mod chain;
pub mod output;
pub mod span;

pub use chain::{BufferChain, ChainPosition};
pub use output::{OutputStats, OutputStream, DEFAULT_BLOCK_SIZE};
pub use span::ByteSpan;
