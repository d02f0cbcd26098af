// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GIOP message header.
//!
//! Every GIOP message starts with a fixed 12-byte header:
//!
//! ```text
//! +--------+-------+-------+-------+------+------------------+
//! | "GIOP" | major | minor | flags | type | body size (u32)  |
//! |   4B   |  1B   |  1B   |  1B   |  1B  | flagged byte ord |
//! +--------+-------+-------+-------+------+------------------+
//! ```
//!
//! Flags bit 0 selects little-endian encoding of the body size (and of the
//! body itself), bit 1 announces that more fragments follow. Body
//! marshaling is outside this crate.

use std::fmt;

use crate::alloc::AllocError;

/// Header magic.
pub const GIOP_MAGIC: [u8; 4] = *b"GIOP";

/// Size of the fixed header in bytes.
pub const GIOP_HEADER_SIZE: usize = 12;

/// Flags bit: body is little-endian.
pub const FLAG_LITTLE_ENDIAN: u8 = 0x01;

/// Flags bit: more fragments follow (GIOP 1.1+).
pub const FLAG_MORE_FRAGMENTS: u8 = 0x02;

/// GIOP protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GiopVersion {
    pub major: u8,
    pub minor: u8,
}

impl GiopVersion {
    pub const V1_0: Self = Self { major: 1, minor: 0 };
    pub const V1_1: Self = Self { major: 1, minor: 1 };
    pub const V1_2: Self = Self { major: 1, minor: 2 };

    fn is_supported(self) -> bool {
        self.major == 1 && self.minor <= 2
    }
}

impl Default for GiopVersion {
    fn default() -> Self {
        Self::V1_2
    }
}

impl fmt::Display for GiopVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// GIOP message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Reply = 1,
    CancelRequest = 2,
    LocateRequest = 3,
    LocateReply = 4,
    CloseConnection = 5,
    MessageError = 6,
    Fragment = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = GiopError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Reply),
            2 => Ok(Self::CancelRequest),
            3 => Ok(Self::LocateRequest),
            4 => Ok(Self::LocateReply),
            5 => Ok(Self::CloseConnection),
            6 => Ok(Self::MessageError),
            7 => Ok(Self::Fragment),
            other => Err(GiopError::UnknownMessageType(other)),
        }
    }
}

/// Header decoding and framing errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GiopError {
    /// Fewer than 12 bytes available
    Truncated { len: usize },
    /// First four bytes are not `GIOP`
    BadMagic([u8; 4]),
    /// Version other than 1.0 - 1.2
    UnsupportedVersion(GiopVersion),
    /// Message type byte out of range
    UnknownMessageType(u8),
    /// Body larger than the 32-bit size field
    BodyTooLarge(usize),
    /// `end_message` without `begin_message`
    NoMessageStarted,
    /// Header block already lent to a queued message
    HeaderShared,
    /// `begin_message` on a stream that already holds bytes
    StreamNotEmpty(usize),
    /// No block for the header could be allocated
    Alloc(AllocError),
}

impl fmt::Display for GiopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => {
                write!(f, "GIOP header truncated: {len} of {GIOP_HEADER_SIZE} bytes")
            }
            Self::BadMagic(magic) => write!(f, "bad GIOP magic {magic:02x?}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported GIOP version {v}"),
            Self::UnknownMessageType(t) => write!(f, "unknown GIOP message type {t}"),
            Self::BodyTooLarge(len) => write!(f, "GIOP body of {len} bytes exceeds u32"),
            Self::NoMessageStarted => write!(f, "no GIOP message in progress"),
            Self::HeaderShared => write!(f, "GIOP header block is shared and cannot be patched"),
            Self::StreamNotEmpty(len) => {
                write!(f, "cannot start a GIOP message after {len} buffered bytes")
            }
            Self::Alloc(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GiopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocError> for GiopError {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}

/// Decoded GIOP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GiopHeader {
    pub version: GiopVersion,
    pub flags: u8,
    pub message_type: MessageType,
    /// Body size, excluding the 12 header bytes
    pub message_size: u32,
}

impl GiopHeader {
    /// Header in native byte order for the default version.
    pub fn new(message_type: MessageType, message_size: u32) -> Self {
        let flags = if cfg!(target_endian = "little") {
            FLAG_LITTLE_ENDIAN
        } else {
            0
        };
        Self {
            version: GiopVersion::default(),
            flags,
            message_type,
            message_size,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_LITTLE_ENDIAN != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.flags & FLAG_MORE_FRAGMENTS != 0
    }

    /// Header plus body length.
    pub fn total_size(&self) -> usize {
        GIOP_HEADER_SIZE + self.message_size as usize
    }

    pub fn encode(&self) -> [u8; GIOP_HEADER_SIZE] {
        let mut out = [0u8; GIOP_HEADER_SIZE];
        out[..4].copy_from_slice(&GIOP_MAGIC);
        out[4] = self.version.major;
        out[5] = self.version.minor;
        out[6] = self.flags;
        out[7] = self.message_type as u8;
        out[8..].copy_from_slice(&encode_size(self.message_size, self.is_little_endian()));
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, GiopError> {
        if buf.len() < GIOP_HEADER_SIZE {
            return Err(GiopError::Truncated { len: buf.len() });
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != GIOP_MAGIC {
            return Err(GiopError::BadMagic(magic));
        }

        let version = GiopVersion {
            major: buf[4],
            minor: buf[5],
        };
        if !version.is_supported() {
            return Err(GiopError::UnsupportedVersion(version));
        }

        let flags = buf[6];
        let message_type = MessageType::try_from(buf[7])?;
        let size = [buf[8], buf[9], buf[10], buf[11]];
        let message_size = if flags & FLAG_LITTLE_ENDIAN != 0 {
            u32::from_le_bytes(size)
        } else {
            u32::from_be_bytes(size)
        };

        Ok(Self {
            version,
            flags,
            message_type,
            message_size,
        })
    }
}

/// Body size field in the byte order selected by the flags.
pub(crate) fn encode_size(size: u32, little_endian: bool) -> [u8; 4] {
    if little_endian {
        size.to_le_bytes()
    } else {
        size.to_be_bytes()
    }
}
