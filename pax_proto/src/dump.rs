// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Chunked bulk-dump wire protocol.
//!
//! Results too large for one MRPC response are retrieved through a four
//! phase handshake sharing one op-code per dump type: start, poll status
//! until the chip finishes assembling, fetch chunks by offset, finish to
//! release the chip-side session. The same shape serves topology dumps,
//! fabric database dumps, and log retrieval.

use open_enum::open_enum;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::little_endian;

/// Sub-commands shared by every dump-capable op-code.
pub mod subcmd {
    /// Begin assembling the dump.
    pub const START: u8 = 1;
    /// Query assembly status and total length.
    pub const STATUS: u8 = 2;
    /// Fetch one chunk at a byte offset.
    pub const GET: u8 = 3;
    /// Release the chip-side session.
    pub const FINISH: u8 = 4;
}

#[open_enum]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
/// Assembly status reported by [`subcmd::STATUS`].
pub enum DumpStatus {
    NOT_STARTED = 1,
    IN_PROGRESS = 2,
    READY = 3,
    FAILED = 4,
    WRONG_SUB_CMD = 5,
}

/// Largest chunk payload returned by one [`subcmd::GET`].
pub const CHUNK_DATA_MAX: usize = 1000;

/// A [`subcmd::START`] request.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct StartRequest {
    /// [`subcmd::START`].
    pub subcmd: u8,
    /// Reserved.
    pub reserved: [u8; 3],
    /// Dump-type specific parameter (for example, which log to assemble).
    pub param: little_endian::U32,
}

/// Response to a [`subcmd::STATUS`] request.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct StatusReply {
    /// A [`DumpStatus`] value.
    pub status: u8,
    /// Reserved.
    pub reserved: u8,
    /// Total dump length in doublewords.
    pub data_len_dw: little_endian::U16,
}

/// A [`subcmd::GET`] request.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ChunkRequest {
    /// [`subcmd::GET`].
    pub subcmd: u8,
    /// Reserved.
    pub reserved: u8,
    /// Byte offset of the requested chunk.
    pub offset: little_endian::U16,
}

/// Header of a [`subcmd::GET`] response; up to [`CHUNK_DATA_MAX`] data bytes
/// follow.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ChunkReplyHeader {
    /// A [`DumpStatus`] value.
    pub status: u8,
    /// Reserved.
    pub reserved: u8,
    /// Length of the returned chunk in doublewords.
    pub data_len_dw: little_endian::U16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_fits_one_command() {
        assert_eq!(size_of::<ChunkReplyHeader>(), 4);
        assert!(
            size_of::<ChunkReplyHeader>() + CHUNK_DATA_MAX
                <= crate::mrpc::MRPC_MAX_DATA_LEN
        );
    }
}
