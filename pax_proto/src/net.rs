// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Network management-channel framing.
//!
//! The management service speaks length-prefixed binary packets over a
//! stream socket: a fixed header carrying a magic, protocol version,
//! function and packet type, and the payload/expected-output lengths,
//! followed by a variable body. Command traffic and asynchronous event
//! notification use separate sockets.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::big_endian;

/// Magic at the start of every packet.
pub const SIGNATURE: u32 = 0x5041_584d; // "PAXM"

/// Protocol version this library speaks.
pub const VERSION: u8 = 1;

/// Packet type values.
pub mod packet_type {
    /// Channel open/close negotiation.
    pub const OPEN: u8 = 0xb1;
    /// Command traffic and event notification.
    pub const CMD: u8 = 0xb2;
}

/// Function type values for [`packet_type::OPEN`] packets.
pub mod open_func {
    #![expect(missing_docs)] // self-explanatory variants

    pub const REQUEST: u8 = 0x1;
    pub const ACCEPT: u8 = 0x2;
    pub const REJECT: u8 = 0x3;
    pub const CLOSE: u8 = 0x4;
}

/// Function type values for [`packet_type::CMD`] packets.
pub mod cmd_func {
    /// An MRPC command carried in the body (command word + payload).
    pub const MRPC_CMD: u8 = 0x1;
    /// A register access request carried in the body.
    pub const REG_CMD: u8 = 0x2;
    /// The response to an MRPC command (result code + output).
    pub const MRPC_RESP: u8 = 0x3;
    /// Asynchronous event notification on the event socket.
    pub const EVENT: u8 = 0x4;
    /// The response to a register access request.
    pub const REG_RESP: u8 = 0x5;
}

/// Channel roles requested at open time.
pub mod channel {
    /// The command request/response channel.
    pub const COMMAND: u8 = 0x0;
    /// The asynchronous event notification channel.
    pub const EVENT: u8 = 0x1;
}

/// The fixed packet header.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PacketHeader {
    /// [`SIGNATURE`].
    pub signature: big_endian::U32,
    /// [`VERSION`].
    pub version: u8,
    /// Reserved.
    pub reserved0: u8,
    /// One of the function type values for this packet type.
    pub function_type: u8,
    /// One of [`packet_type`].
    pub packet_type: u8,
    /// Service instance selector (channel role at open time).
    pub service_inst: u8,
    /// Reserved.
    pub reserved1: u8,
    /// Length of the body following this header.
    pub payload_len: big_endian::U16,
    /// Expected output length on requests; return code on responses.
    pub output_len: big_endian::U16,
    /// Reserved.
    pub reserved2: [u8; 2],
}

impl PacketHeader {
    /// A header for a new outbound packet.
    pub fn new(packet_type: u8, function_type: u8) -> Self {
        PacketHeader {
            signature: SIGNATURE.into(),
            version: VERSION,
            reserved0: 0,
            function_type,
            packet_type,
            service_inst: 0,
            reserved1: 0,
            payload_len: 0.into(),
            output_len: 0.into(),
            reserved2: [0; 2],
        }
    }
}

/// Remote register access command ids, the first word of a
/// [`cmd_func::REG_CMD`] body.
pub mod remote_regs {
    /// Read a register-space span.
    pub const READ: u32 = 0x1001;
    /// Write a register-space span.
    pub const WRITE: u32 = 0x1002;
}

/// Largest register-space span one remote read moves.
pub const REMOTE_READ_MAX: usize = 512;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_sixteen_bytes() {
        assert_eq!(size_of::<PacketHeader>(), 16);
    }

    #[test]
    fn signature_serializes_big_endian() {
        let hdr = PacketHeader::new(packet_type::CMD, cmd_func::MRPC_CMD);
        assert_eq!(&hdr.as_bytes()[..4], &[0x50, 0x41, 0x58, 0x4d]);
    }
}
