// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Chip-reported error codes.
//!
//! A positive MRPC result is an error code assigned by the switch firmware.
//! A few codes are op-code specific; the rest are global. Undocumented codes
//! decode to `None` and should be reported as unknown protocol errors rather
//! than dropped.

use crate::mrpc::CommandId;

/// Global error codes, meaningful for any op-code.
const GLOBAL: &[(u32, &str)] = &[
    (0x64001, "no available MRPC handler thread"),
    (0x64002, "the handler thread is not idle"),
    (0x64003, "no background thread run for the command"),
    (0x64004, "invalid subcommand"),
    (0x64005, "invalid command"),
    (0x64006, "invalid parameter"),
    (0x64007, "bad firmware state"),
    (0x100001, "invalid stack"),
    (0x100002, "invalid port"),
    (0x100003, "invalid event"),
    (0x100005, "reset rule search failed"),
    (0xffff_0001, "access refused"),
];

/// Error codes whose meaning is scoped to one op-code.
const OP_SCOPED: &[(CommandId, u32, &str)] = &[
    (CommandId::PORT_PART_P2P, 0x1, "port already bound"),
    (CommandId::PORT_PART_P2P, 0x2, "logical port not bound"),
    (CommandId::GET_PAX_ID, 0x1, "fabric firmware not running"),
];

/// Decodes a chip-reported error code, preferring the op-scoped meaning.
pub fn describe(op: CommandId, code: u32) -> Option<&'static str> {
    let base = op.base();
    if let Some(&(_, _, desc)) = OP_SCOPED
        .iter()
        .find(|&&(c, v, _)| c == base && v == code)
    {
        return Some(desc);
    }
    GLOBAL
        .iter()
        .find(|&&(v, _)| v == code)
        .map(|&(_, desc)| desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_scoped_wins() {
        assert_eq!(
            describe(CommandId::PORT_PART_P2P, 0x1),
            Some("port already bound")
        );
        assert_eq!(describe(CommandId::ECHO, 0x64005), Some("invalid command"));
        assert_eq!(describe(CommandId::ECHO, 0xdead), None);
    }

    #[test]
    fn routing_bits_do_not_change_scope() {
        let routed = CommandId(crate::mrpc::command_word(CommandId::GET_PAX_ID, 5));
        assert_eq!(describe(routed, 0x1), Some("fabric firmware not running"));
    }
}
