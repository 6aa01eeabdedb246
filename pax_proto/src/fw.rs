// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware image transfer wire protocol.
//!
//! An image moves to the switch as a sequence of blocks, each carrying its
//! absolute offset and the total image length. After every block the chip
//! reports a download status; the transfer only continues while it reports
//! forward progress.

use crate::mrpc::MRPC_MAX_DATA_LEN;
use open_enum::open_enum;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::little_endian;

/// Sub-commands of the firmware download op-code.
pub mod subcmd {
    /// Query the current download status.
    pub const GET_STATUS: u8 = 0;
    /// Transfer one image block.
    pub const DOWNLOAD: u8 = 1;
    /// Toggle the active image/config partition. Not retry-safe.
    pub const TOGGLE: u8 = 2;
}

#[open_enum]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
/// Download status reported by the chip.
pub enum DownloadStatus {
    READY = 0,
    IN_PROGRESS = 1,
    HEADER_INCORRECT = 2,
    OFFSET_INCORRECT = 3,
    CRC_INCORRECT = 4,
    LENGTH_INCORRECT = 5,
    HARDWARE_ERROR = 6,
    COMPLETE = 7,
    ACTIVATED_AS_FIRMWARE = 8,
    ACTIVATED_AS_DATA = 9,
}

impl DownloadStatus {
    /// Whether this is one of the three terminal success outcomes:
    /// downloaded but not activated, activated as firmware, or activated as
    /// data/config.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            DownloadStatus::COMPLETE
                | DownloadStatus::ACTIVATED_AS_FIRMWARE
                | DownloadStatus::ACTIVATED_AS_DATA
        )
    }
}

/// Response to a [`subcmd::GET_STATUS`] request.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct StatusReply {
    /// A [`DownloadStatus`] value.
    pub dlstatus: u8,
    /// A [`crate::mrpc::BackgroundStatus`] value.
    pub bgstatus: u8,
    /// Reserved.
    pub reserved: little_endian::U16,
}

/// Header of a [`subcmd::DOWNLOAD`] request; the block data follows
/// immediately.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct BlockHeader {
    /// [`subcmd::DOWNLOAD`].
    pub subcmd: u8,
    /// Nonzero to leave the image inactive once fully transferred.
    pub dont_activate: u8,
    /// Reserved.
    pub reserved: [u8; 2],
    /// Absolute byte offset of this block within the image.
    pub offset: little_endian::U32,
    /// Total image length in bytes.
    pub img_length: little_endian::U32,
    /// Length of this block in bytes.
    pub blk_length: little_endian::U32,
}

/// Largest block payload that still fits one MRPC request together with its
/// header.
pub const BLOCK_DATA_MAX: usize = MRPC_MAX_DATA_LEN - size_of::<BlockHeader>();

/// A [`subcmd::TOGGLE`] request.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ToggleRequest {
    /// [`subcmd::TOGGLE`].
    pub subcmd: u8,
    /// Nonzero to toggle the active firmware image.
    pub toggle_fw: u8,
    /// Nonzero to toggle the active configuration image.
    pub toggle_cfg: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_layout() {
        assert_eq!(size_of::<BlockHeader>(), 16);
        assert_eq!(BLOCK_DATA_MAX, 1008);
    }

    #[test]
    fn success_statuses() {
        assert!(DownloadStatus::COMPLETE.is_success());
        assert!(DownloadStatus::ACTIVATED_AS_FIRMWARE.is_success());
        assert!(DownloadStatus::ACTIVATED_AS_DATA.is_success());
        assert!(!DownloadStatus::READY.is_success());
        assert!(!DownloadStatus::HARDWARE_ERROR.is_success());
        assert!(!DownloadStatus(0x33).is_success());
    }
}
