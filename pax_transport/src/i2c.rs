// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SMBus/I2C slave link to the switch.
//!
//! The switch answers a small set of SMBus command codes that move spans of
//! the register space: a tagged write, a write-status query confirming a
//! tagged write landed, and a read. Every frame carries a packet error
//! check (CRC-8 over the addressed byte stream). MRPC commands run through
//! the register path ([`crate::regcmd`]).
//!
//! The bus is the least reliable channel to the switch, so register units
//! are retried a bounded number of times; exhausting the budget means the
//! register state is unknown and the link reports
//! [`TransportError::Unrecoverable`].

#![cfg(target_os = "linux")]
// UNSAFETY: I2C_RDWR ioctls carrying raw message descriptors.
#![expect(unsafe_code)]

use crate::Backend;
use crate::TransportError;
use crate::regcmd;
use pax_proto::crc8::crc8;
use pax_proto::mrpc::RetrySafety;
use pax_proto::regs::GasAddress;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::Duration;

const I2C_RDWR: libc::c_ulong = 0x0707;
const I2C_FUNCS: libc::c_ulong = 0x0705;
const I2C_FUNC_I2C: libc::c_ulong = 0x0000_0001;
const I2C_M_RD: u16 = 0x0001;

const CMD_GAS_WRITE: u8 = 0xea;
const CMD_GET_WRITE_STATUS: u8 = 0xe2;
const CMD_GAS_READ: u8 = 0xe9;

/// Write status the switch reports when the targeted register write itself
/// completed but triggered an MRPC-layer error.
const TWI_MRPC_ERR: u8 = 0x20;

const MAX_RETRY: u32 = 100;
const MAX_STATUS_RETRY: u32 = 50;

/// One transaction moves at most this many register bytes; the frame limit
/// is a little higher, but doubleword-aligned spans behave best.
const UNIT: usize = 24;

#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

#[repr(C)]
struct I2cRdwrData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

/// A backend speaking to the switch as an I2C slave behind an adapter
/// device such as `/dev/i2c-1`.
pub struct I2cDevice {
    file: File,
    addr: u16,
    tag: u8,
}

impl I2cDevice {
    /// Opens the adapter at `path` and targets the slave at `addr`.
    pub fn open(path: &Path, addr: u16) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut funcs: libc::c_ulong = 0;
        // SAFETY: I2C_FUNCS fills one c_ulong.
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), I2C_FUNCS, &mut funcs) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if funcs & I2C_FUNC_I2C == 0 {
            return Err(io::Error::other("adapter lacks plain i2c transfers"));
        }

        Ok(I2cDevice { file, addr, tag: 0 })
    }

    fn next_tag(&mut self) -> u8 {
        // Valid tags are 0x01..=0xff.
        self.tag = self.tag.wrapping_add(1);
        if self.tag == 0 {
            self.tag = 1;
        }
        self.tag
    }

    fn transfer(&self, msgs: &mut [I2cMsg]) -> Result<(), TransportError> {
        let mut data = I2cRdwrData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        // SAFETY: `data` references valid messages whose buffers outlive
        // the call.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_RDWR, &mut data) };
        if ret < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// CRC-8 over the wire image of one message: the addressed slave byte
    /// followed by `payload`.
    fn msg_pec(&self, read: bool, payload: &[u8], init: u8) -> u8 {
        let addressed = (self.addr as u8) << 1 | read as u8;
        crc8(payload, crc8(&[addressed], init))
    }

    /// Sends one tagged register write frame.
    fn send_write_frame(
        &mut self,
        addr: GasAddress,
        data: &[u8],
        tag: u8,
    ) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(7 + data.len() + 1);
        frame.push(CMD_GAS_WRITE);
        frame.push((1 + 4 + data.len()) as u8);
        frame.push(tag);
        frame.extend_from_slice(&addr.0.to_be_bytes());
        frame.extend_from_slice(data);
        let pec = self.msg_pec(false, &frame, 0);
        frame.push(pec);

        let mut msg = I2cMsg {
            addr: self.addr,
            flags: 0,
            len: frame.len() as u16,
            buf: frame.as_mut_ptr(),
        };
        self.transfer(std::slice::from_mut(&mut msg))
    }

    /// Polls the write status until the switch confirms `tag`.
    fn write_status(&mut self, tag: u8) -> Result<u8, TransportError> {
        for _ in 0..MAX_STATUS_RETRY {
            let mut cmd = [CMD_GET_WRITE_STATUS];
            let mut reply = [0u8; 3];
            let mut msgs = [
                I2cMsg {
                    addr: self.addr,
                    flags: 0,
                    len: cmd.len() as u16,
                    buf: cmd.as_mut_ptr(),
                },
                I2cMsg {
                    addr: self.addr,
                    flags: I2C_M_RD,
                    len: reply.len() as u16,
                    buf: reply.as_mut_ptr(),
                },
            ];
            if self.transfer(&mut msgs).is_ok() {
                let pec = self.msg_pec(false, &cmd, 0);
                let pec = self.msg_pec(true, &reply[..2], pec);
                if reply[0] == tag
                    && reply[2] == pec
                    && (reply[1] == 0 || reply[1] == TWI_MRPC_ERR)
                {
                    return Ok(reply[1]);
                }
            }
            // The early boot phases answer slowly.
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(TransportError::Malformed("write status never confirmed"))
    }

    /// Writes one register unit, retrying up to `attempts` times.
    fn write_unit(
        &mut self,
        addr: GasAddress,
        data: &[u8],
        attempts: u32,
    ) -> Result<(), TransportError> {
        debug_assert!(data.len() <= UNIT);
        for _ in 0..attempts {
            let tag = self.next_tag();
            self.send_write_frame(addr, data, tag)?;
            if self.write_status(tag).is_ok() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Err(TransportError::Unrecoverable)
    }

    /// Reads one register unit, retrying on a bad packet error check.
    fn read_unit(&mut self, addr: GasAddress, buf: &mut [u8]) -> Result<(), TransportError> {
        debug_assert!(buf.len() <= UNIT);
        for _ in 0..MAX_RETRY {
            let mut cmd = Vec::with_capacity(7);
            cmd.push(CMD_GAS_READ);
            cmd.push(5);
            cmd.extend_from_slice(&addr.0.to_be_bytes());
            cmd.push(buf.len() as u8);

            // Reply: byte count, data, status, packet error check.
            let mut reply = vec![0u8; 1 + buf.len() + 2];
            let mut msgs = [
                I2cMsg {
                    addr: self.addr,
                    flags: 0,
                    len: cmd.len() as u16,
                    buf: cmd.as_mut_ptr(),
                },
                I2cMsg {
                    addr: self.addr,
                    flags: I2C_M_RD,
                    len: reply.len() as u16,
                    buf: reply.as_mut_ptr(),
                },
            ];
            self.transfer(&mut msgs)?;

            let pec = self.msg_pec(false, &cmd, 0);
            let pec = self.msg_pec(true, &reply[..reply.len() - 1], pec);
            let status = reply[reply.len() - 2];
            if reply[reply.len() - 1] == pec && (status == 0 || status == TWI_MRPC_ERR) {
                buf.copy_from_slice(&reply[1..1 + buf.len()]);
                return Ok(());
            }
        }
        Err(TransportError::Unrecoverable)
    }
}

impl Backend for I2cDevice {
    fn submit(
        &mut self,
        cmd: u32,
        input: &[u8],
        _resp_len: usize,
        safety: RetrySafety,
    ) -> Result<(), TransportError> {
        regcmd::submit(self, cmd, input, safety)
    }

    fn collect(&mut self, output: &mut [u8]) -> Result<u32, TransportError> {
        regcmd::collect(self, output, regcmd::STATUS_POLL_INTERVAL)
    }

    fn gas_read8(&mut self, addr: GasAddress) -> Result<u8, TransportError> {
        let mut buf = [0u8; 1];
        self.read_unit(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError> {
        let mut buf = [0u8; 2];
        self.read_unit(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError> {
        let mut buf = [0u8; 4];
        self.read_unit(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError> {
        let mut buf = [0u8; 8];
        self.read_unit(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError> {
        self.write_unit(addr, &[val], MAX_RETRY)
    }

    fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError> {
        self.write_unit(addr, &val.to_le_bytes(), MAX_RETRY)
    }

    fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.write_unit(addr, &val.to_le_bytes(), MAX_RETRY)
    }

    fn gas_write32_once(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.write_unit(addr, &val.to_le_bytes(), 1)
    }

    fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError> {
        self.write_unit(addr, &val.to_le_bytes(), MAX_RETRY)
    }

    fn gas_read_block(
        &mut self,
        addr: GasAddress,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        let mut offset = 0;
        for chunk in buf.chunks_mut(UNIT) {
            self.read_unit(addr.offset(offset), chunk)?;
            offset += chunk.len() as u32;
        }
        Ok(())
    }

    fn gas_write_block(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        let mut offset = 0;
        for chunk in data.chunks(UNIT) {
            self.write_unit(addr.offset(offset), chunk, MAX_RETRY)?;
            offset += chunk.len() as u32;
        }
        Ok(())
    }

    fn event_wait(&mut self, _timeout: Option<Duration>) -> Result<bool, TransportError> {
        Err(TransportError::NotSupported)
    }
}
