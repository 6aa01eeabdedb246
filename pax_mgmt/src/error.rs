// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error taxonomy.
//!
//! Failures stay in three disjoint domains: system/transport errors
//! ([`Error::Transport`], [`Error::Backend`]), chip-reported protocol
//! errors ([`SwitchError`]), and local protocol-consistency violations
//! ([`ProtocolViolation`]). Every failure is a returned value; the library
//! keeps no error state of any kind between calls.

use pax_proto::fw::DownloadStatus;
use pax_proto::mrpc::CommandId;
use pax_transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Result type of every fallible operation in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure a management operation can report.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed while carrying a command.
    #[error("transport failure during the {} command", .op.name())]
    Transport {
        /// The command in flight when the transport failed.
        op: CommandId,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The transport failed during a non-command operation (direct register
    /// access or an event wait).
    #[error("transport failure")]
    Backend(#[source] TransportError),

    /// The switch executed the command and reported an error code.
    #[error(transparent)]
    Switch(#[from] SwitchError),

    /// The switch's behavior contradicted the protocol; nothing was
    /// retried.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// A local I/O sink or source failed.
    #[error("i/o failure")]
    Io(#[from] std::io::Error),

    /// The caller passed something this library cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl Error {
    pub(crate) fn transport(op: CommandId, source: TransportError) -> Self {
        Error::Transport { op, source }
    }
}

/// A chip-reported error: the positive result code of a completed command,
/// together with the op-code that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchError {
    /// The base op-code of the failed command.
    pub op: CommandId,
    /// The chip's result code.
    pub code: u32,
}

impl SwitchError {
    /// The documented meaning of the code, or a fixed fallback for codes
    /// this library does not know.
    pub fn description(&self) -> &'static str {
        pax_proto::error::describe(self.op, self.code).unwrap_or("unknown protocol error")
    }
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the {} command failed: {} ({:#x})",
            self.op.name(),
            self.description(),
            self.code
        )
    }
}

impl std::error::Error for SwitchError {}

/// A local protocol-consistency failure, distinct from anything the chip
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A dump left the assembling state with something other than ready.
    #[error("dump did not become ready: status {status:#x}")]
    DumpNotReady {
        /// The terminal dump status.
        status: u8,
    },

    /// A chunk reply claimed more bytes than the declared total allows.
    #[error(
        "chunk of {got} bytes at offset {offset} overruns the declared total of {total}"
    )]
    ChunkOverrun {
        /// Offset the chunk was requested at.
        offset: usize,
        /// Bytes the reply claimed.
        got: usize,
        /// Total length the status phase declared.
        total: usize,
    },

    /// A chunk reply carried no data while the transfer was incomplete.
    #[error("zero-length chunk at offset {offset}")]
    EmptyChunk {
        /// Offset the chunk was requested at.
        offset: usize,
    },

    /// A status poll loop exceeded its iteration budget.
    #[error("status poll budget exhausted")]
    PollBudget,

    /// A firmware download is already running on the switch.
    #[error("a firmware download is already in progress")]
    DownloadBusy,

    /// The chip reported a failing download status.
    #[error("firmware download failed with status {:#x}", .status.0)]
    DownloadFailed {
        /// The failing status.
        status: DownloadStatus,
    },

    /// The download status contradicts the number of bytes transferred.
    #[error("download status {:#x} inconsistent with {sent} bytes sent", .status.0)]
    DownloadState {
        /// The status the chip reported.
        status: DownloadStatus,
        /// Bytes this library sent.
        sent: u64,
    },
}
