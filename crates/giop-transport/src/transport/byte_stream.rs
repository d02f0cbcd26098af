// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream abstraction the transport writes queued messages to.
//!
//! Implemented for [`TcpStream`] and for boxed trait objects. Queued bytes
//! leave through [`Write::write_vectored`], so implementations that can
//! gather several buffers in one call should override it.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// Shuts a stream down from a thread other than the one writing to it.
pub trait ShutdownHandle: Send + Sync {
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
}

impl ShutdownHandle for TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }
}

/// Abstraction over connection-oriented byte streams.
pub trait ByteStream: Write + Send + 'static {
    /// Shutdown the stream.
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Get the peer address of this stream.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Set non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Set TCP_NODELAY (disable Nagle's algorithm).
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    /// Take error from the socket.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Handle able to interrupt a write blocked on this stream.
    ///
    /// Streams without one can only be shut down between writes.
    fn shutdown_handle(&self) -> io::Result<Box<dyn ShutdownHandle>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream has no shutdown handle",
        ))
    }
}

// ============================================================================
// TcpStream implementation
// ============================================================================

impl ByteStream for TcpStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        TcpStream::take_error(self)
    }

    fn shutdown_handle(&self) -> io::Result<Box<dyn ShutdownHandle>> {
        Ok(Box::new(self.try_clone()?))
    }
}

// ============================================================================
// Boxed ByteStream
// ============================================================================

/// Type alias for a boxed ByteStream.
pub type BoxedByteStream = Box<dyn ByteStream>;

impl ByteStream for BoxedByteStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        (**self).shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        (**self).set_nonblocking(nonblocking)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        (**self).set_nodelay(nodelay)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        (**self).take_error()
    }

    fn shutdown_handle(&self) -> io::Result<Box<dyn ShutdownHandle>> {
        (**self).shutdown_handle()
    }
}

// ============================================================================
// Test mock stream
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
