// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The register access layer.
//!
//! Register reads and writes either go straight to the transport's
//! register primitives or ride the register read/write op-codes, chosen by
//! comparing the handle's routing target against the attached switch's own
//! fabric index. Callers cannot observe which path was taken beyond
//! latency: direct access is atomic per width, tunneled access per
//! command-sized chunk.

use crate::Switch;
use crate::bulk::spans;
use crate::error::Error;
use crate::error::Result;
use pax_proto::gas;
use pax_proto::mrpc::CommandId;
use pax_proto::mrpc::PAX_ID_LOCAL;
use pax_proto::regs::GasAddress;
use zerocopy::IntoBytes;

impl Switch {
    /// Whether register access must tunnel through commands to reach the
    /// routing target.
    fn tunneled(&self) -> bool {
        self.pax_id != PAX_ID_LOCAL && Some(self.pax_id) != self.local_pax_id
    }

    /// Reads one byte of the target's register space.
    pub fn gas_read8(&mut self, addr: GasAddress) -> Result<u8> {
        if self.tunneled() {
            let mut buf = [0u8; 1];
            self.tunnel_read(addr, &mut buf)?;
            Ok(buf[0])
        } else {
            self.backend.gas_read8(addr).map_err(Error::Backend)
        }
    }

    /// Reads a 16-bit register.
    pub fn gas_read16(&mut self, addr: GasAddress) -> Result<u16> {
        if self.tunneled() {
            let mut buf = [0u8; 2];
            self.tunnel_read(addr, &mut buf)?;
            Ok(u16::from_le_bytes(buf))
        } else {
            self.backend.gas_read16(addr).map_err(Error::Backend)
        }
    }

    /// Reads a 32-bit register.
    pub fn gas_read32(&mut self, addr: GasAddress) -> Result<u32> {
        if self.tunneled() {
            let mut buf = [0u8; 4];
            self.tunnel_read(addr, &mut buf)?;
            Ok(u32::from_le_bytes(buf))
        } else {
            self.backend.gas_read32(addr).map_err(Error::Backend)
        }
    }

    /// Reads a 64-bit register.
    pub fn gas_read64(&mut self, addr: GasAddress) -> Result<u64> {
        if self.tunneled() {
            let mut buf = [0u8; 8];
            self.tunnel_read(addr, &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        } else {
            self.backend.gas_read64(addr).map_err(Error::Backend)
        }
    }

    /// Writes one byte of the target's register space.
    pub fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<()> {
        if self.tunneled() {
            self.tunnel_write(addr, &[val])
        } else {
            self.backend.gas_write8(addr, val).map_err(Error::Backend)
        }
    }

    /// Writes a 16-bit register.
    pub fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<()> {
        if self.tunneled() {
            self.tunnel_write(addr, &val.to_le_bytes())
        } else {
            self.backend.gas_write16(addr, val).map_err(Error::Backend)
        }
    }

    /// Writes a 32-bit register.
    pub fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<()> {
        if self.tunneled() {
            self.tunnel_write(addr, &val.to_le_bytes())
        } else {
            self.backend.gas_write32(addr, val).map_err(Error::Backend)
        }
    }

    /// Writes a 64-bit register.
    pub fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<()> {
        if self.tunneled() {
            self.tunnel_write(addr, &val.to_le_bytes())
        } else {
            self.backend.gas_write64(addr, val).map_err(Error::Backend)
        }
    }

    /// Copies a span out of the target's register space.
    pub fn gas_read(&mut self, addr: GasAddress, buf: &mut [u8]) -> Result<()> {
        if self.tunneled() {
            self.tunnel_read(addr, buf)
        } else {
            self.backend
                .gas_read_block(addr, buf)
                .map_err(Error::Backend)
        }
    }

    /// Copies a span into the target's register space.
    pub fn gas_write(&mut self, addr: GasAddress, data: &[u8]) -> Result<()> {
        if self.tunneled() {
            self.tunnel_write(addr, data)
        } else {
            self.backend
                .gas_write_block(addr, data)
                .map_err(Error::Backend)
        }
    }

    /// Byte length of the addressable register space.
    pub fn gas_len(&self) -> u32 {
        self.backend.gas_len()
    }

    fn tunnel_read(&mut self, addr: GasAddress, buf: &mut [u8]) -> Result<()> {
        for (offset, len) in spans(buf.len(), gas::READ_MAX) {
            let request = gas::ReadRequest {
                offset: (addr.0 + offset as u32).into(),
                len: (len as u32).into(),
            };
            self.command(
                CommandId::GAS_READ,
                request.as_bytes(),
                &mut buf[offset..offset + len],
            )?;
        }
        Ok(())
    }

    fn tunnel_write(&mut self, addr: GasAddress, data: &[u8]) -> Result<()> {
        for (offset, len) in spans(data.len(), gas::WRITE_MAX) {
            let header = gas::WriteHeader {
                offset: (addr.0 + offset as u32).into(),
                len: (len as u32).into(),
            };
            let mut request = Vec::with_capacity(size_of::<gas::WriteHeader>() + len);
            request.extend_from_slice(header.as_bytes());
            request.extend_from_slice(&data[offset..offset + len]);
            self.command(CommandId::GAS_WRITE, &request, &mut [])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::open_sim;
    use pax_proto::mrpc::CommandId;
    use pax_proto::regs::GasAddress;

    const SCRATCH: GasAddress = GasAddress(0x3000);

    #[test]
    fn direct_round_trips_at_every_width() {
        let (mut dev, _ctl) = open_sim();

        dev.gas_write8(SCRATCH, 0xa5).unwrap();
        assert_eq!(dev.gas_read8(SCRATCH).unwrap(), 0xa5);

        dev.gas_write16(SCRATCH, 0xbeef).unwrap();
        assert_eq!(dev.gas_read16(SCRATCH).unwrap(), 0xbeef);

        dev.gas_write32(SCRATCH, 0x1234_5678).unwrap();
        assert_eq!(dev.gas_read32(SCRATCH).unwrap(), 0x1234_5678);

        dev.gas_write64(SCRATCH, 0xdead_beef_f00d_cafe).unwrap();
        assert_eq!(dev.gas_read64(SCRATCH).unwrap(), 0xdead_beef_f00d_cafe);
    }

    #[test]
    fn tunneled_round_trips_at_every_width() {
        let (mut dev, ctl) = open_sim();
        ctl.set_local_pax(0);
        dev.set_pax_id(3).unwrap();

        dev.gas_write8(SCRATCH, 0x5a).unwrap();
        assert_eq!(dev.gas_read8(SCRATCH).unwrap(), 0x5a);

        dev.gas_write16(SCRATCH, 0xf00d).unwrap();
        assert_eq!(dev.gas_read16(SCRATCH).unwrap(), 0xf00d);

        dev.gas_write32(SCRATCH, 0x8765_4321).unwrap();
        assert_eq!(dev.gas_read32(SCRATCH).unwrap(), 0x8765_4321);

        dev.gas_write64(SCRATCH, 0x0123_4567_89ab_cdef).unwrap();
        assert_eq!(dev.gas_read64(SCRATCH).unwrap(), 0x0123_4567_89ab_cdef);

        // Every access above rode the register op-codes.
        assert!(ctl.submit_count(CommandId::GAS_READ) >= 4);
        assert!(ctl.submit_count(CommandId::GAS_WRITE) >= 4);
    }

    #[test]
    fn the_two_paths_see_the_same_registers() {
        let (mut dev, ctl) = open_sim();
        dev.gas_write32(SCRATCH, 0x1111_2222).unwrap();

        ctl.set_local_pax(0);
        dev.set_pax_id(5).unwrap();
        assert_eq!(dev.gas_read32(SCRATCH).unwrap(), 0x1111_2222);

        dev.set_pax_local();
        assert_eq!(dev.gas_read32(SCRATCH).unwrap(), 0x1111_2222);
    }

    #[test]
    fn a_target_equal_to_the_local_index_stays_direct() {
        let (mut dev, ctl) = open_sim();
        ctl.set_local_pax(4);
        dev.set_pax_id(4).unwrap();

        dev.gas_write32(SCRATCH, 0x9999_0000).unwrap();
        assert_eq!(dev.gas_read32(SCRATCH).unwrap(), 0x9999_0000);
        // No register op-code traffic: the target is the attached switch.
        assert_eq!(ctl.submit_count(CommandId::GAS_READ), 0);
        assert_eq!(ctl.submit_count(CommandId::GAS_WRITE), 0);
    }

    #[test]
    fn long_tunneled_spans_chunk_to_the_payload_caps() {
        let (mut dev, ctl) = open_sim();
        ctl.set_local_pax(0);
        dev.set_pax_id(2).unwrap();

        let data: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        dev.gas_write(GasAddress(0x8000), &data).unwrap();
        // 3000 bytes at 1016 per write: three commands.
        assert_eq!(ctl.submit_count(CommandId::GAS_WRITE), 3);

        let mut back = vec![0u8; 3000];
        dev.gas_read(GasAddress(0x8000), &mut back).unwrap();
        assert_eq!(back, data);
        // 3000 bytes at 1024 per read: three commands.
        assert_eq!(ctl.submit_count(CommandId::GAS_READ), 3);
    }
}
