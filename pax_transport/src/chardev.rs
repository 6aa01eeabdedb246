// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Linux switch management character device.
//!
//! The kernel driver exposes a request/response command channel through
//! `write(2)`/`read(2)` on the device node, maps the register space through
//! `mmap(2)`, and signals events by making the descriptor poll-ready with
//! `POLLPRI`.
//!
//! If the driver still holds the response of an earlier, interrupted client
//! it fails the next submission with `EBADE`; that surfaces here as
//! [`TransportError::Desynchronized`] so the command engine can decide
//! whether draining and resending is safe.

#![cfg(target_os = "linux")]
// UNSAFETY: mmap of the device register window and volatile access into it.
#![expect(unsafe_code)]

use crate::Backend;
use crate::TransportError;
use crate::check_range;
use pax_proto::mrpc::RetrySafety;
use pax_proto::regs::GAS_MAP_SIZE;
use pax_proto::regs::GasAddress;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::Duration;

/// A backend speaking to the kernel switch driver through a device node
/// such as `/dev/pax0`.
pub struct CharDevice {
    file: File,
    map: Option<Mapping>,
}

struct Mapping {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is an exclusively owned view of device memory; the
// raw pointer is not tied to any thread.
unsafe impl Send for Mapping {}

impl Mapping {
    fn new(file: &File) -> io::Result<Self> {
        let len = GAS_MAP_SIZE;
        for prot in [libc::PROT_READ | libc::PROT_WRITE, libc::PROT_READ] {
            // SAFETY: mapping a fresh region; no existing Rust memory is
            // affected.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    prot,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };
            if ptr != libc::MAP_FAILED {
                return Ok(Mapping {
                    ptr: ptr.cast(),
                    len,
                });
            }
        }
        Err(io::Error::last_os_error())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the exact region mapped in `new`.
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

impl CharDevice {
    /// Opens the management device at `path`.
    ///
    /// The register window is mapped eagerly when the caller has the
    /// privilege for it; without the mapping, commands still work but
    /// direct register access reports [`TransportError::NotSupported`].
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = match Mapping::new(&file) {
            Ok(map) => Some(map),
            Err(err) => {
                tracing::debug!(
                    path = %path.display(),
                    error = &err as &dyn std::error::Error,
                    "register window not mappable, direct access disabled"
                );
                None
            }
        };
        Ok(CharDevice { file, map })
    }

    fn mapping(&self, addr: GasAddress, len: usize) -> Result<*mut u8, TransportError> {
        let map = self.map.as_ref().ok_or(TransportError::NotSupported)?;
        let offset = check_range(addr, len, map.len)?;
        // SAFETY: offset + len lies inside the mapping per check_range.
        Ok(unsafe { map.ptr.add(offset) })
    }

    fn read_plain<T: Copy>(&self, addr: GasAddress) -> Result<T, TransportError> {
        let ptr = self.mapping(addr, size_of::<T>())?;
        // SAFETY: in bounds per `mapping`; device registers are read with a
        // single volatile access.
        Ok(unsafe { ptr.cast::<T>().read_volatile() })
    }

    fn write_plain<T: Copy>(&self, addr: GasAddress, val: T) -> Result<(), TransportError> {
        let ptr = self.mapping(addr, size_of::<T>())?;
        // SAFETY: in bounds per `mapping`; single volatile store.
        unsafe { ptr.cast::<T>().write_volatile(val) }
        Ok(())
    }
}

impl Backend for CharDevice {
    fn submit(
        &mut self,
        cmd: u32,
        input: &[u8],
        _resp_len: usize,
        _safety: RetrySafety,
    ) -> Result<(), TransportError> {
        let mut buf = Vec::with_capacity(4 + input.len());
        buf.extend_from_slice(&cmd.to_le_bytes());
        buf.extend_from_slice(input);

        match (&self.file).write(&buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(_) => Err(TransportError::Io(io::Error::other(
                "short write to the command channel",
            ))),
            Err(err) if err.raw_os_error() == Some(libc::EBADE) => {
                Err(TransportError::Desynchronized)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn collect(&mut self, output: &mut [u8]) -> Result<u32, TransportError> {
        let mut buf = vec![0u8; 4 + output.len()];
        let n = (&self.file).read(&mut buf)?;
        if n != buf.len() {
            return Err(TransportError::Malformed("response length mismatch"));
        }

        let mut ret = [0u8; 4];
        ret.copy_from_slice(&buf[..4]);
        output.copy_from_slice(&buf[4..]);
        Ok(u32::from_le_bytes(ret))
    }

    fn gas_read8(&mut self, addr: GasAddress) -> Result<u8, TransportError> {
        self.read_plain(addr)
    }

    fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError> {
        self.read_plain(addr)
    }

    fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError> {
        self.read_plain(addr)
    }

    fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError> {
        self.read_plain(addr)
    }

    fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError> {
        self.write_plain(addr, val)
    }

    fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError> {
        self.write_plain(addr, val)
    }

    fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.write_plain(addr, val)
    }

    fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError> {
        self.write_plain(addr, val)
    }

    fn gas_read_block(
        &mut self,
        addr: GasAddress,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        let ptr = self.mapping(addr, buf.len())?;
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: in bounds per `mapping`.
            *byte = unsafe { ptr.add(i).read_volatile() };
        }
        Ok(())
    }

    fn gas_write_block(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        let ptr = self.mapping(addr, data.len())?;
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: in bounds per `mapping`.
            unsafe { ptr.add(i).write_volatile(*byte) };
        }
        Ok(())
    }

    fn event_wait(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };
        let mut fds = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLPRI,
            revents: 0,
        };
        // SAFETY: fds points at one valid pollfd for the duration of the
        // call.
        let ret = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if ret < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        Ok(ret > 0)
    }
}
