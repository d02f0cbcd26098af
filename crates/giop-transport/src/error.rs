// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport error type.

use std::fmt;
use std::io;

use crate::alloc::AllocError;
use crate::giop::GiopError;
use crate::lf::LfState;

/// Errors reported by [`Transport`](crate::transport::Transport) operations.
#[derive(Debug)]
pub enum TransportError {
    /// Write to the byte stream failed
    Io(io::Error),
    /// Buffer or message allocation failed
    Alloc(AllocError),
    /// GIOP framing error
    Giop(GiopError),
    /// Configuration rejected by `TransportConfig::validate`
    InvalidConfig(&'static str),
    /// Transport already closed
    Closed,
    /// Enqueueing would exceed the configured outbound limit
    QueueFull { queued: usize, limit: usize },
    /// Send did not complete in time
    Timeout,
    /// Message ended in a non-success state
    Failed(LfState),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Alloc(e) => write!(f, "{}", e),
            Self::Giop(e) => write!(f, "{}", e),
            Self::InvalidConfig(msg) => write!(f, "invalid transport config: {}", msg),
            Self::Closed => write!(f, "transport closed"),
            Self::QueueFull { queued, limit } => {
                write!(f, "outbound queue full ({} of {} bytes)", queued, limit)
            }
            Self::Timeout => write!(f, "send timed out"),
            Self::Failed(state) => write!(f, "message ended in state {}", state),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Alloc(e) => Some(e),
            Self::Giop(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<AllocError> for TransportError {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}

impl From<GiopError> for TransportError {
    fn from(e: GiopError) -> Self {
        match e {
            GiopError::Alloc(e) => Self::Alloc(e),
            other => Self::Giop(other),
        }
    }
}
