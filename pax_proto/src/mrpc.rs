// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MRPC command identifiers and dispatch-level classification.
//!
//! An MRPC command is a 32-bit command word followed by a bounded request
//! payload; the switch answers with a 32-bit result code and a bounded
//! response payload. The command word carries the base op-code in its low
//! bits and the routing target (PAX id) of the switch instance that should
//! execute the command in a small field above them.

use open_enum::open_enum;

/// Maximum number of request or response payload bytes in one MRPC command.
pub const MRPC_MAX_DATA_LEN: usize = 1024;

/// Mask selecting the base op-code bits of a command word.
pub const CMD_MASK: u32 = 0xffff;

/// Bit position of the routing-target (PAX id) field in a command word.
pub const PAX_ID_SHIFT: u32 = 18;

/// Width mask of the routing-target field.
pub const PAX_ID_MASK: u32 = 0x1f;

/// Routing-target value addressing the switch the transport is physically
/// attached to. Commands built with this value carry no routing bits.
pub const PAX_ID_LOCAL: u8 = PAX_ID_MASK as u8;

#[open_enum]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
/// MRPC base op-codes.
///
/// This is a non-exhaustive subset of the op-codes the chip family
/// implements; add values as they become needed.
pub enum CommandId {
    DIE_TEMP = 0x04,
    FW_DOWNLOAD = 0x05,
    LOG_DUMP = 0x06,
    PORT_PART_P2P = 0x0c,
    RESET = 0x1b,
    GAS_READ = 0x28,
    GAS_WRITE = 0x32,
    ECHO = 0x41,
    GET_PAX_ID = 0x42,
    TOPO_INFO_DUMP = 0x43,
    GFMS_DB_DUMP = 0x44,
    SECURITY_CONFIG_GET = 0xa1,
    SECURITY_CONFIG_SET = 0xa2,
    KMSK_ENTRY_SET = 0xa3,
    SECURE_STATE_SET = 0xa4,
    DBG_UNLOCK = 0xa9,
    BOOTUP_RESUME = 0xaa,
}

impl CommandId {
    /// The base op-code of a possibly routed command word.
    pub const fn base(self) -> CommandId {
        CommandId(self.0 & CMD_MASK)
    }

    /// Short human-readable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self.base() {
            CommandId::DIE_TEMP => "die temperature",
            CommandId::FW_DOWNLOAD => "firmware download",
            CommandId::LOG_DUMP => "log retrieval",
            CommandId::PORT_PART_P2P => "port partition binding",
            CommandId::RESET => "reset",
            CommandId::GAS_READ => "register read",
            CommandId::GAS_WRITE => "register write",
            CommandId::ECHO => "echo",
            CommandId::GET_PAX_ID => "local fabric switch index",
            CommandId::TOPO_INFO_DUMP => "fabric topology dump",
            CommandId::GFMS_DB_DUMP => "fabric database dump",
            CommandId::SECURITY_CONFIG_GET => "secure configuration get",
            CommandId::SECURITY_CONFIG_SET => "secure configuration set",
            CommandId::KMSK_ENTRY_SET => "key entry set",
            CommandId::SECURE_STATE_SET => "secure state set",
            CommandId::DBG_UNLOCK => "resource unlock",
            CommandId::BOOTUP_RESUME => "bootup resume",
            _ => "unknown",
        }
    }
}

/// Builds the wire command word for `cmd` routed to `pax_id`.
///
/// The local sentinel produces a bare op-code so that switches without
/// fabric firmware still accept the command.
pub const fn command_word(cmd: CommandId, pax_id: u8) -> u32 {
    let mut word = cmd.0 & CMD_MASK;
    if pax_id != PAX_ID_LOCAL {
        word |= ((pax_id as u32) & PAX_ID_MASK) << PAX_ID_SHIFT;
    }
    word
}

#[open_enum]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
/// Values of the MRPC status register during command execution.
pub enum MrpcStatus {
    IN_PROGRESS = 1,
    DONE = 2,
    ERROR = 0xff,
    INTERRUPTED = 0x100,
}

#[open_enum]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
/// Background execution status for commands the chip completes
/// asynchronously (notably firmware download blocks).
pub enum BackgroundStatus {
    IDLE = 0,
    IN_PROGRESS = 1,
    DONE = 2,
    ERROR = 0xff,
}

/// Sub-commands of [`CommandId::DIE_TEMP`].
pub mod dietemp {
    /// Latch a new temperature measurement.
    pub const SET_MEAS: u32 = 1;
    /// Read the latched measurement, in hundredths of a degree Celsius.
    pub const GET: u32 = 2;
}

/// Sub-commands of [`CommandId::PORT_PART_P2P`].
pub mod bind {
    /// Query the binding state of a physical port.
    pub const INFO: u8 = 1;
    /// Bind a physical port to a (partition, logical port) pair.
    pub const BIND: u8 = 2;
    /// Unbind a logical port from a partition.
    pub const UNBIND: u8 = 3;
}

/// Whether a command may be transparently re-submitted after a transient
/// transport fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrySafety {
    /// Idempotent; a duplicate execution is harmless.
    Safe,
    /// Re-execution could repeat an irreversible side effect (one-time-
    /// programmable writes, secure-state transitions, image execution).
    /// Never resent automatically.
    NoRetry,
}

/// Commands that must never be auto-retried. An entry with a sub-command
/// restricts the classification to requests whose first payload byte
/// matches; an entry without one covers the whole op-code.
const NO_RETRY_CMDS: &[(CommandId, Option<u8>)] = &[
    (CommandId::SECURITY_CONFIG_SET, None),
    (CommandId::KMSK_ENTRY_SET, None),
    (CommandId::SECURE_STATE_SET, None),
    (CommandId::DBG_UNLOCK, None),
    (CommandId::BOOTUP_RESUME, None),
    (CommandId::FW_DOWNLOAD, Some(crate::fw::subcmd::TOGGLE)),
];

/// Classifies a command against the static no-retry table.
///
/// `subcmd` is the first request payload byte, when the request has one.
pub fn retry_safety(cmd: CommandId, subcmd: Option<u8>) -> RetrySafety {
    let base = cmd.base();
    for &(no_retry_cmd, no_retry_sub) in NO_RETRY_CMDS {
        if base != no_retry_cmd {
            continue;
        }
        match no_retry_sub {
            None => return RetrySafety::NoRetry,
            Some(sub) if Some(sub) == subcmd => return RetrySafety::NoRetry,
            Some(_) => {}
        }
    }
    RetrySafety::Safe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_bits() {
        assert_eq!(command_word(CommandId::ECHO, PAX_ID_LOCAL), 0x41);
        assert_eq!(command_word(CommandId::ECHO, 3), 0x41 | (3 << 18));
        // An over-wide id is truncated to the field, not smeared over the
        // op-code.
        assert_eq!(
            command_word(CommandId::ECHO, 0x3e),
            0x41 | ((0x3e & 0x1f) << 18)
        );
    }

    #[test]
    fn classification_by_opcode() {
        assert_eq!(
            retry_safety(CommandId::SECURE_STATE_SET, Some(0)),
            RetrySafety::NoRetry
        );
        assert_eq!(
            retry_safety(CommandId::SECURE_STATE_SET, None),
            RetrySafety::NoRetry
        );
        assert_eq!(retry_safety(CommandId::ECHO, None), RetrySafety::Safe);
    }

    #[test]
    fn classification_by_subcommand() {
        use crate::fw::subcmd;
        assert_eq!(
            retry_safety(CommandId::FW_DOWNLOAD, Some(subcmd::TOGGLE)),
            RetrySafety::NoRetry
        );
        assert_eq!(
            retry_safety(CommandId::FW_DOWNLOAD, Some(subcmd::DOWNLOAD)),
            RetrySafety::Safe
        );
        assert_eq!(
            retry_safety(CommandId::FW_DOWNLOAD, None),
            RetrySafety::Safe
        );
    }

    #[test]
    fn classification_ignores_routing_bits() {
        let routed = CommandId(command_word(CommandId::SECURE_STATE_SET, 2));
        assert_eq!(retry_safety(routed, None), RetrySafety::NoRetry);
    }
}
