// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serial console link to the switch.
//!
//! The switch firmware exposes a debug console on a UART. Register access
//! rides the console's `gasrd`/`gaswr` text commands with CRC-8 protection:
//! a write carries the checksum of the big-endian address followed by the
//! payload in reverse byte order, and the console echoes the checksum pair
//! it computed; a read returns the data bytes and the checksum of address
//! plus data. Responses end in the firmware's `addr:idx>` prompt.
//!
//! A reply that never reaches a prompt, or that fails its checksum, is
//! discarded and the command line is resent exactly once before the access
//! is declared unrecoverable.

#![cfg(target_os = "linux")]
// UNSAFETY: termios configuration, advisory locking, and isatty on the raw
// descriptor.
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
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

/// Longest register span one `gaswr` line carries.
const MAX_WRITE: usize = 100;
/// Longest register span requested per `gasrd` line.
const MAX_READ: usize = 512;
/// Chunks of console output are awaited this many times before the reply is
/// declared malformed.
const READ_RETRIES: u32 = 50;

const LINE_POLL: Duration = Duration::from_millis(5);

/// A backend speaking to the switch firmware console on a serial device.
pub struct UartConsole {
    file: File,
}

impl UartConsole {
    /// Opens the console at `path`, locks it, and quiets the firmware's
    /// debug chatter and echo.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;

        // SAFETY: querying the freshly opened descriptor.
        if unsafe { libc::isatty(file.as_raw_fd()) } == 0 {
            return Err(io::Error::other("not a terminal"));
        }
        // SAFETY: advisory lock on the owned descriptor.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } < 0 {
            return Err(io::Error::last_os_error());
        }
        set_console_attrs(&file)?;

        let mut console = UartConsole { file };
        console
            .console_command("pscdbg 0 all\r")
            .and_then(|_| console.console_command("echo 0\r"))
            .map_err(|_| io::Error::other("console did not answer with a prompt"))?;
        Ok(console)
    }

    /// Sends one command line and returns everything the console printed up
    /// to and including its prompt. Retries once after a reply that never
    /// reaches a prompt.
    fn console_command(&mut self, line: &str) -> Result<String, TransportError> {
        for attempt in 0..2 {
            self.file.write_all(line.as_bytes())?;
            match self.read_until_prompt() {
                Ok(reply) => return Ok(reply),
                Err(TransportError::Malformed(_)) if attempt == 0 => {
                    tracing::warn!(line, "discarding malformed console reply, resending");
                }
                Err(err) => return Err(err),
            }
        }
        Err(TransportError::Unrecoverable)
    }

    fn read_until_prompt(&mut self) -> Result<String, TransportError> {
        let mut reply = String::new();
        for _ in 0..READ_RETRIES {
            let mut chunk = [0u8; 256];
            let n = self.file.read(&mut chunk)?;
            reply.push_str(&String::from_utf8_lossy(&chunk[..n]));
            if ends_with_prompt(&reply) {
                return Ok(reply);
            }
            std::thread::sleep(LINE_POLL);
        }
        Err(TransportError::Malformed("console reply never reached a prompt"))
    }

    /// Writes one register span with `gaswr`.
    fn write_span(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        debug_assert!(data.len() <= MAX_WRITE);

        let mut checked = Vec::with_capacity(4 + data.len());
        checked.extend_from_slice(&addr.0.to_be_bytes());
        checked.extend(data.iter().rev());
        let crc = crc8(&checked, 0);

        let mut line = format!("gaswr -c -s {:#x} 0x", addr.0);
        for byte in data.iter().rev() {
            line.push_str(&format!("{byte:02x}"));
        }
        line.push_str(&format!(" {crc:#x}\r"));

        for attempt in 0..2 {
            let reply = self.console_command(&line)?;
            match parse_write_reply(&reply) {
                Some((calculated, expected))
                    if calculated == expected || calculated == crc as u32 =>
                {
                    return Ok(());
                }
                _ if attempt == 0 => {
                    tracing::warn!(addr = addr.0, "gaswr checksum mismatch, resending once");
                }
                _ => {}
            }
        }
        Err(TransportError::Unrecoverable)
    }

    /// Reads one register span with `gasrd`.
    fn read_span(&mut self, addr: GasAddress, buf: &mut [u8]) -> Result<(), TransportError> {
        debug_assert!(buf.len() <= MAX_READ);

        let line = format!("gasrd -c -s {:#x} {}\r", addr.0, buf.len());
        for attempt in 0..2 {
            let reply = self.console_command(&line)?;

            let parsed = parse_read_reply(&reply).filter(|(reply_addr, bytes, _)| {
                *reply_addr == addr.0 && bytes.len() == buf.len()
            });
            if let Some((_, bytes, reply_crc)) = parsed {
                let mut checked = Vec::with_capacity(4 + bytes.len());
                checked.extend_from_slice(&addr.0.to_be_bytes());
                checked.extend_from_slice(&bytes);
                if crc8(&checked, 0) == reply_crc {
                    buf.copy_from_slice(&bytes);
                    return Ok(());
                }
            }
            if attempt == 0 {
                tracing::warn!(addr = addr.0, "gasrd reply failed its check, resending once");
            }
        }
        Err(TransportError::Unrecoverable)
    }
}

impl Drop for UartConsole {
    fn drop(&mut self) {
        // Give the next user of the console their echo back.
        let _ = self.file.write_all(b"echo 1\r");
    }
}

fn set_console_attrs(file: &File) -> io::Result<()> {
    // SAFETY: termios is plain data filled by tcgetattr before use.
    unsafe {
        let mut attrs: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(file.as_raw_fd(), &mut attrs) != 0 {
            return Err(io::Error::last_os_error());
        }

        libc::cfsetospeed(&mut attrs, libc::B230400);
        libc::cfsetispeed(&mut attrs, libc::B230400);

        attrs.c_iflag &= !(libc::IGNBRK | libc::IXON | libc::IXOFF | libc::IXANY);
        attrs.c_lflag = 0;
        attrs.c_oflag = 0;
        attrs.c_cflag = (attrs.c_cflag & !libc::CSIZE) | libc::CS8;
        attrs.c_cflag |= libc::CLOCAL | libc::CREAD;
        attrs.c_cflag &= !(libc::PARENB | libc::PARODD | libc::CSTOPB | libc::CRTSCTS);
        // Reads return whatever arrived within half a second.
        attrs.c_cc[libc::VMIN] = 0;
        attrs.c_cc[libc::VTIME] = 5;

        if libc::tcsetattr(file.as_raw_fd(), libc::TCSANOW, &attrs) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Whether `reply` ends in the firmware prompt, `<hex address>:<hex idx>>`.
fn ends_with_prompt(reply: &str) -> bool {
    let trimmed = reply.trim_end();
    let Some(rest) = trimmed.strip_suffix('>') else {
        return false;
    };
    let Some(colon) = rest.rfind(':') else {
        return false;
    };
    let idx = &rest[colon + 1..];
    !idx.is_empty() && idx.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses the `[0xCALC/0xEXPECTED]` checksum pair a `gaswr` reply reports.
fn parse_write_reply(reply: &str) -> Option<(u32, u32)> {
    let open = reply.find("[0x")?;
    let close = reply[open..].find(']')? + open;
    let (calc, expected) = reply[open + 1..close].split_once('/')?;
    let calc = u32::from_str_radix(calc.strip_prefix("0x")?, 16).ok()?;
    let expected = u32::from_str_radix(expected.strip_prefix("0x")?, 16).ok()?;
    Some((calc, expected))
}

/// Parses a `gasrd` reply: `<0xADDR> [N Byte] XX XX .. CRC: 0xCC`.
fn parse_read_reply(reply: &str) -> Option<(u32, Vec<u8>, u8)> {
    let addr_open = reply.find("<0x")?;
    let addr_close = reply[addr_open..].find('>')? + addr_open;
    let addr = u32::from_str_radix(&reply[addr_open + 3..addr_close], 16).ok()?;

    let count_open = reply[addr_close..].find('[')? + addr_close;
    let count_close = reply[count_open..].find(" Byte]")? + count_open;
    let count: usize = reply[count_open + 1..count_close].trim().parse().ok()?;

    let data_start = count_close + " Byte]".len();
    let crc_pos = reply[data_start..].find("CRC:")? + data_start;
    let bytes: Vec<u8> = reply[data_start..crc_pos]
        .split_ascii_whitespace()
        .map(|tok| u8::from_str_radix(tok.trim_start_matches("0x"), 16))
        .collect::<Result<_, _>>()
        .ok()?;
    if bytes.len() != count {
        return None;
    }

    let crc_str = reply[crc_pos + 4..].trim_start();
    let crc_end = crc_str
        .find(|c: char| !(c.is_ascii_hexdigit() || c == 'x'))
        .unwrap_or(crc_str.len());
    let crc = u8::from_str_radix(crc_str[..crc_end].trim_start_matches("0x"), 16).ok()?;

    Some((addr, bytes, crc))
}

impl Backend for UartConsole {
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
        self.read_span(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError> {
        let mut buf = [0u8; 2];
        self.read_span(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError> {
        let mut buf = [0u8; 4];
        self.read_span(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError> {
        let mut buf = [0u8; 8];
        self.read_span(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError> {
        self.write_span(addr, &[val])
    }

    fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError> {
        self.write_span(addr, &val.to_le_bytes())
    }

    fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.write_span(addr, &val.to_le_bytes())
    }

    fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError> {
        self.write_span(addr, &val.to_le_bytes())
    }

    fn gas_read_block(
        &mut self,
        addr: GasAddress,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        let mut offset = 0;
        for chunk in buf.chunks_mut(MAX_READ) {
            self.read_span(addr.offset(offset), chunk)?;
            offset += chunk.len() as u32;
        }
        Ok(())
    }

    fn gas_write_block(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        let mut offset = 0;
        for chunk in data.chunks(MAX_WRITE) {
            self.write_span(addr.offset(offset), chunk)?;
            offset += chunk.len() as u32;
        }
        Ok(())
    }

    fn event_wait(&mut self, _timeout: Option<Duration>) -> Result<bool, TransportError> {
        Err(TransportError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_detection() {
        assert!(ends_with_prompt("gaswr ok\r\n0x12345678:2964>"));
        assert!(ends_with_prompt("0:0> "));
        assert!(!ends_with_prompt("still printing"));
        assert!(!ends_with_prompt("no prompt yet>"));
    }

    #[test]
    fn write_reply_checksums() {
        assert_eq!(
            parse_write_reply("crc: [0x5a/0x5a]\r\n0:1>"),
            Some((0x5a, 0x5a))
        );
        assert_eq!(parse_write_reply("garbage"), None);
    }

    #[test]
    fn read_reply_bytes() {
        let reply = "gas_rd <0x1000> [4 Byte]\r\n 00 11 22 33\r\nCRC: 0x7c\r\n0:1>";
        let (addr, bytes, crc) = parse_read_reply(reply).unwrap();
        assert_eq!(addr, 0x1000);
        assert_eq!(bytes, [0x00, 0x11, 0x22, 0x33]);
        assert_eq!(crc, 0x7c);
    }
}
