// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transport backends for PAX fabric-switch management.
//!
//! Every physical channel to a switch (the management character device, an
//! SMBus/I2C slave link, a serial console, or a network-tunneled management
//! service) implements the one [`Backend`] contract: submit and collect an
//! MRPC command, raw register-space access at every width, and a blocking
//! event wait. Higher layers never learn which channel they are talking
//! through.
//!
//! A backend moves bytes; it does not interpret commands. The single
//! permitted exception is resynchronizing a text-protocol console by
//! discarding one malformed line and resending once. Command-level retry
//! policy lives above, in the command engine.

pub mod chardev;
pub mod i2c;
pub mod regcmd;
pub mod sim;
pub mod tcp;
pub mod uart;

use pax_proto::mrpc::RetrySafety;
use pax_proto::regs::GAS_MAP_SIZE;
use pax_proto::regs::GasAddress;
use std::time::Duration;
use thiserror::Error;

/// A failure at the transport layer, before any chip-reported result code
/// enters the picture.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An I/O failure on the underlying channel.
    #[error("transport i/o failure")]
    Io(#[from] std::io::Error),

    /// The channel has a stale response pending from an earlier,
    /// interrupted exchange. The caller may drain one response and resend
    /// once, if the command is safe to resend.
    #[error("transport desynchronized: a stale response is pending")]
    Desynchronized,

    /// The chip abandoned the command before completion.
    #[error("command interrupted before completion")]
    Interrupted,

    /// The transport cannot perform this operation at all.
    #[error("operation not supported by this transport")]
    NotSupported,

    /// The switch answered with a frame this library cannot make sense of.
    #[error("malformed frame from the switch: {0}")]
    Malformed(&'static str),

    /// A register access outside the register space.
    #[error("register offset {offset:#x}..+{len:#x} outside the register space")]
    OutOfRange {
        /// Starting byte offset of the access.
        offset: u32,
        /// Length of the access in bytes.
        len: usize,
    },

    /// Register access failed after exhausting bus-level retries. The state
    /// of the register space is unknown and no further traffic should be
    /// sent through this handle.
    #[error("unrecoverable register access fault")]
    Unrecoverable,
}

/// The uniform capability contract every transport supplies.
///
/// A backend either supports direct register access at *all* widths or at
/// none of them; the trait makes partial capability unrepresentable by
/// requiring every accessor.
///
/// Backends are single-slot: at most one command may be in flight between
/// [`submit`](Backend::submit) and [`collect`](Backend::collect), and the
/// `&mut` receivers make interleaving from safe code impossible.
pub trait Backend: Send {
    /// Sends a command word and its request payload.
    ///
    /// `resp_len` is the response payload size the caller will collect;
    /// framed transports put it on the wire. `safety` tells transports that
    /// trigger execution through an unreliable bus whether the trigger
    /// write may be retried.
    fn submit(
        &mut self,
        cmd: u32,
        input: &[u8],
        resp_len: usize,
        safety: RetrySafety,
    ) -> Result<(), TransportError>;

    /// Blocks until the submitted command completes, copies the response
    /// payload into `output`, and returns the chip's result code (zero on
    /// success, positive for a chip-reported error).
    fn collect(&mut self, output: &mut [u8]) -> Result<u32, TransportError>;

    /// Reads one byte of the register space.
    fn gas_read8(&mut self, addr: GasAddress) -> Result<u8, TransportError>;
    /// Reads a 16-bit register.
    fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError>;
    /// Reads a 32-bit register.
    fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError>;
    /// Reads a 64-bit register.
    fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError>;

    /// Writes one byte of the register space.
    fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError>;
    /// Writes a 16-bit register.
    fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError>;
    /// Writes a 32-bit register.
    fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError>;
    /// Writes a 64-bit register.
    fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError>;

    /// Writes a 32-bit register without any bus-level retry, so that a
    /// command trigger cannot be issued twice. Transports whose writes are
    /// already exactly-once use the plain write.
    fn gas_write32_once(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.gas_write32(addr, val)
    }

    /// Copies a span out of the register space.
    fn gas_read_block(
        &mut self,
        addr: GasAddress,
        buf: &mut [u8],
    ) -> Result<(), TransportError>;

    /// Copies a span into the register space.
    fn gas_write_block(&mut self, addr: GasAddress, data: &[u8])
    -> Result<(), TransportError>;

    /// Byte length of the addressable register space.
    fn gas_len(&self) -> u32 {
        GAS_MAP_SIZE as u32
    }

    /// Blocks until the transport sees an event notification or the timeout
    /// elapses. `None` waits forever; a zero duration polls.
    ///
    /// Returns `Ok(true)` when notified and `Ok(false)` on timeout.
    fn event_wait(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError>;
}

/// Bounds-checks an access against a register space of `space_len` bytes.
pub(crate) fn check_range(
    addr: GasAddress,
    len: usize,
    space_len: usize,
) -> Result<usize, TransportError> {
    let offset = addr.0 as usize;
    if space_len < offset || space_len - offset < len {
        return Err(TransportError::OutOfRange {
            offset: addr.0,
            len,
        });
    }
    Ok(offset)
}
