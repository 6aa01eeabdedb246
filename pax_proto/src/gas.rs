// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command-tunneled register access wire structs.
//!
//! When a command targets a remote fabric node, register access cannot go
//! through the local mapping; instead it rides the register read/write
//! op-codes, which respect the routing target. Spans larger than one
//! command payload are split by the caller.

use crate::mrpc::MRPC_MAX_DATA_LEN;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::little_endian;

/// Request payload of the register read op-code; the response is the raw
/// span.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ReadRequest {
    /// Byte offset into the register space.
    pub offset: little_endian::U32,
    /// Number of bytes to read.
    pub len: little_endian::U32,
}

/// Header of the register write op-code's request; the data to write
/// follows immediately.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct WriteHeader {
    /// Byte offset into the register space.
    pub offset: little_endian::U32,
    /// Number of bytes that follow.
    pub len: little_endian::U32,
}

/// Largest span one tunneled read returns.
pub const READ_MAX: usize = MRPC_MAX_DATA_LEN;

/// Largest span one tunneled write carries next to its header.
pub const WRITE_MAX: usize = MRPC_MAX_DATA_LEN - size_of::<WriteHeader>();
