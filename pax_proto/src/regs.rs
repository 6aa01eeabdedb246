// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register-space ("GAS") layout.
//!
//! The switch exposes its full register file as a flat, memory-mappable
//! address space. Offsets are modeled as a [`GasAddress`] newtype so that no
//! dereferenceable pointer into the register space ever escapes a transport;
//! all access goes through the width-typed accessors on the device handle,
//! which decide between direct and command-tunneled access.

/// A byte offset into the switch register space.
///
/// This is a logical address: it is only meaningful to the transport that
/// resolves it, never to host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GasAddress(pub u32);

impl GasAddress {
    /// The address `n` bytes past `self`.
    pub const fn offset(self, n: u32) -> GasAddress {
        GasAddress(self.0 + n)
    }
}

/// Total span of the register space a transport reserves or maps.
pub const GAS_MAP_SIZE: usize = 4 << 20;

/// MRPC request/response register block.
pub mod mrpc {
    use super::GasAddress;

    /// Request payload buffer.
    pub const INPUT_DATA: GasAddress = GasAddress(0x0000);
    /// Response payload buffer.
    pub const OUTPUT_DATA: GasAddress = GasAddress(0x0400);
    /// Command word; writing it starts execution.
    pub const CMD: GasAddress = GasAddress(0x0800);
    /// Execution status, one of the `MrpcStatus` values.
    pub const STATUS: GasAddress = GasAddress(0x0804);
    /// Result code of the completed command.
    pub const RET_VALUE: GasAddress = GasAddress(0x0808);
}

/// Top-level configuration block.
pub mod top {
    #![expect(missing_docs)] // registers are self-explanatory

    use super::GasAddress;

    const BASE: GasAddress = GasAddress(0x1000);

    pub const PARTITION_COUNT: GasAddress = BASE.offset(7);
    pub const PARTITION_ID: GasAddress = BASE.offset(8);
    pub const PFF_COUNT: GasAddress = BASE.offset(9);
}

/// Global event register block.
pub mod sw_event {
    use super::GasAddress;

    pub const BASE: GasAddress = GasAddress(0x1800);

    /// Bitmap of partitions with a pending event summary.
    pub const PART_EVENT_BITMAP: GasAddress = BASE.offset(0x10);
    /// Global event summary word.
    pub const GLOBAL_SUMMARY: GasAddress = BASE.offset(0x20);
}

/// System information block.
pub mod sys_info {
    use super::GasAddress;

    const BASE: GasAddress = GasAddress(0x2000);

    pub const DEVICE_ID: GasAddress = BASE.offset(0x00);
    pub const FIRMWARE_VERSION: GasAddress = BASE.offset(0x08);
    pub const CFG_RUNNING: GasAddress = BASE.offset(0x20);
    pub const IMG_RUNNING: GasAddress = BASE.offset(0x22);

    /// `IMG_RUNNING` value when image 0 is the running firmware.
    pub const IMG0_RUNNING: u16 = 0x03;
    /// `IMG_RUNNING` value when image 1 is the running firmware.
    pub const IMG1_RUNNING: u16 = 0x07;
    /// `CFG_RUNNING` value when config 0 is the running configuration.
    pub const CFG0_RUNNING: u16 = 0x04;
    /// `CFG_RUNNING` value when config 1 is the running configuration.
    pub const CFG1_RUNNING: u16 = 0x05;
}

/// Flash partition map block.
pub mod flash_info {
    #![expect(missing_docs)] // registers are self-explanatory

    use super::GasAddress;

    const BASE: GasAddress = GasAddress(0x2200);

    /// Flash address of the image partition selected for the next boot.
    pub const ACTIVE_IMG_ADDRESS: GasAddress = BASE.offset(0x04);
    /// Flash address of the config partition selected for the next boot.
    pub const ACTIVE_CFG_ADDRESS: GasAddress = BASE.offset(0x10);

    /// (address, length) register pairs, one per partition.
    pub const CFG0: GasAddress = BASE.offset(0x38);
    pub const CFG1: GasAddress = BASE.offset(0x40);
    pub const IMG0: GasAddress = BASE.offset(0x48);
    pub const IMG1: GasAddress = BASE.offset(0x50);
    pub const NVLOG: GasAddress = BASE.offset(0x58);
}

/// Per-partition configuration blocks.
pub mod part_cfg {
    #![expect(missing_docs)] // registers are self-explanatory

    use super::GasAddress;

    const BASE: GasAddress = GasAddress(0x4000);
    /// Size of one partition block.
    pub const STRIDE: u32 = 0x400;

    /// Base address of partition `index`'s block.
    pub const fn at(index: u8) -> GasAddress {
        GasAddress(BASE.0 + index as u32 * STRIDE)
    }

    /// Field offsets within one partition block.
    pub const USP_PFF_INST_ID: u32 = 0x10;
    pub const VEP_PFF_INST_ID: u32 = 0x14;
    pub const DSP_PFF_INST_ID: u32 = 0x18;
    /// Number of downstream-port PFF instance id registers.
    pub const DSP_PFF_COUNT: u32 = 47;
    pub const PART_EVENT_SUMMARY: u32 = 0x114;

    /// Logical port number reported for the virtual EP function.
    pub const VEP_PORT: u32 = 100;
}

/// Per-port-function CSR blocks.
pub mod pff_csr {
    #![expect(missing_docs)] // registers are self-explanatory

    use super::GasAddress;

    const BASE: GasAddress = GasAddress(0x13_4000);
    /// Size of one PFF block.
    pub const STRIDE: u32 = 0x1000;
    /// Number of PFF blocks.
    pub const COUNT: u8 = 48;

    /// Base address of PFF `index`'s block.
    pub const fn at(index: u8) -> GasAddress {
        GasAddress(BASE.0 + index as u32 * STRIDE)
    }

    /// Field offsets within one PFF block.
    pub const VENDOR_ID: u32 = 0x0;
    pub const PFF_EVENT_SUMMARY: u32 = 0xc00;
}

/// PCI vendor id the PFF CSR blocks report while the function is present.
pub const SWITCH_VENDOR_ID: u16 = 0x11f8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_strides_tile_the_map() {
        // 48 partition blocks end exactly where the NTB region begins.
        assert_eq!(part_cfg::at(48).0, 0x10000);
        // PFF blocks stay inside the mapped span.
        let last = pff_csr::at(pff_csr::COUNT - 1);
        assert!(((last.0 + pff_csr::STRIDE) as usize) <= GAS_MAP_SIZE);
    }
}
