// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware image transfer.
//!
//! An image moves to the switch in sequential blocks over the firmware
//! download op-code; after each block the download status is polled until
//! the chip stops reporting background progress. The protocol does not
//! support resuming: any failure means the caller restarts from offset
//! zero.

use crate::Switch;
use crate::bulk::poll_status;
use crate::bulk::spans;
use crate::error::ProtocolViolation;
use crate::error::Result;
use pax_proto::fw;
use pax_proto::fw::DownloadStatus;
use pax_proto::mrpc::BackgroundStatus;
use pax_proto::mrpc::CommandId;
use std::ops::ControlFlow;
use zerocopy::IntoBytes;

/// Options for one image transfer.
#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    /// Leave the image inactive after the transfer instead of letting the
    /// chip activate it.
    pub dont_activate: bool,
    /// Start even if the chip reports a download already in progress.
    pub force: bool,
    /// Bytes per block. The default fills one command payload; transports
    /// with smaller frames still accept it because blocks are chunked
    /// below them, but a larger value only works on transports that allow
    /// oversized payloads.
    pub block_len: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            dont_activate: false,
            force: false,
            block_len: fw::BLOCK_DATA_MAX,
        }
    }
}

impl Switch {
    /// Queries the firmware download status pair.
    pub fn fw_download_status(&mut self) -> Result<(DownloadStatus, BackgroundStatus)> {
        let subcmd = fw::subcmd::GET_STATUS as u32;
        let reply: fw::StatusReply =
            self.command_reply(CommandId::FW_DOWNLOAD, &subcmd.to_le_bytes())?;
        Ok((
            DownloadStatus(reply.dlstatus),
            BackgroundStatus(reply.bgstatus),
        ))
    }

    /// Polls until the chip stops reporting background progress.
    ///
    /// Returns the final benign download status; a failing status or a
    /// background hardware error becomes
    /// [`ProtocolViolation::DownloadFailed`].
    fn fw_wait(&mut self) -> Result<DownloadStatus> {
        poll_status(self, true, |dev| {
            let (dlstatus, bgstatus) = dev.fw_download_status()?;

            let benign = dlstatus == DownloadStatus::IN_PROGRESS || dlstatus.is_success();
            if !benign {
                return Err(ProtocolViolation::DownloadFailed { status: dlstatus }.into());
            }
            if bgstatus == BackgroundStatus::ERROR {
                return Err(ProtocolViolation::DownloadFailed {
                    status: DownloadStatus::HARDWARE_ERROR,
                }
                .into());
            }
            if bgstatus == BackgroundStatus::IN_PROGRESS {
                return Ok(ControlFlow::Continue(()));
            }
            Ok(ControlFlow::Break(dlstatus))
        })
    }

    /// Transfers `image` to the switch.
    ///
    /// `progress` is called after each block with (bytes so far, total
    /// bytes); it cannot cancel the transfer. On failure the whole image
    /// must be resent from offset zero.
    pub fn fw_write(
        &mut self,
        image: &[u8],
        options: DownloadOptions,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        let (dlstatus, bgstatus) = self.fw_download_status()?;
        if !options.force && dlstatus == DownloadStatus::IN_PROGRESS {
            return Err(ProtocolViolation::DownloadBusy.into());
        }
        if bgstatus == BackgroundStatus::IN_PROGRESS {
            return Err(ProtocolViolation::DownloadBusy.into());
        }

        let mut status = DownloadStatus::READY;
        for (offset, len) in spans(image.len(), options.block_len) {
            let header = fw::BlockHeader {
                subcmd: fw::subcmd::DOWNLOAD,
                dont_activate: options.dont_activate as u8,
                reserved: [0; 2],
                offset: (offset as u32).into(),
                img_length: (image.len() as u32).into(),
                blk_length: (len as u32).into(),
            };
            let mut request = Vec::with_capacity(size_of::<fw::BlockHeader>() + len);
            request.extend_from_slice(header.as_bytes());
            request.extend_from_slice(&image[offset..offset + len]);

            self.command(CommandId::FW_DOWNLOAD, &request, &mut [])?;
            status = self.fw_wait()?;

            progress(offset + len, image.len());
        }

        if status.is_success() {
            tracing::debug!(len = image.len(), status = status.0, "image transferred");
            return Ok(());
        }
        // The chip accepted every block but never acknowledged the image.
        Err(ProtocolViolation::DownloadState {
            status,
            sent: image.len() as u64,
        }
        .into())
    }

    /// Toggles the partition selected for the next boot, for the firmware
    /// image, the configuration, or both.
    ///
    /// Classified not-retry-safe: a duplicated toggle would activate the
    /// partition the caller meant to retire.
    pub fn fw_toggle_active(&mut self, toggle_fw: bool, toggle_cfg: bool) -> Result<()> {
        let request = fw::ToggleRequest {
            subcmd: fw::subcmd::TOGGLE,
            toggle_fw: toggle_fw as u8,
            toggle_cfg: toggle_cfg as u8,
        };
        self.command(CommandId::FW_DOWNLOAD, request.as_bytes(), &mut [])
    }
}

#[cfg(test)]
mod tests {
    use crate::FlashPartition;
    use crate::error::Error;
    use crate::error::ProtocolViolation;
    use crate::tests::open_sim;
    use pax_proto::fw::DownloadStatus;

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 3) as u8).collect()
    }

    #[test]
    fn blocks_are_sequential_and_cover_the_image() {
        let (mut dev, ctl) = open_sim();
        let mut reported = Vec::new();

        dev.fw_write(
            &image(10_000),
            crate::DownloadOptions {
                block_len: 4096,
                dont_activate: true,
                ..Default::default()
            },
            |sent, total| reported.push((sent, total)),
        )
        .unwrap();

        // ceil(10000/4096) blocks with strictly increasing offsets.
        assert_eq!(ctl.fw_blocks_seen(), 3);
        assert_eq!(
            reported,
            [(4096, 10_000), (8192, 10_000), (10_000, 10_000)]
        );
    }

    #[test]
    fn default_blocks_fit_one_command() {
        let (mut dev, ctl) = open_sim();
        dev.fw_write(&image(2500), Default::default(), |_, _| {})
            .unwrap();
        // 1008-byte blocks: 1008 + 1008 + 484.
        assert_eq!(ctl.fw_blocks_seen(), 3);
    }

    #[test]
    fn hardware_error_aborts_without_further_blocks() {
        let (mut dev, ctl) = open_sim();
        ctl.fail_fw_block_at(1);

        let err = dev
            .fw_write(
                &image(10_000),
                crate::DownloadOptions {
                    block_len: 4096,
                    ..Default::default()
                },
                |_, _| {},
            )
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::DownloadFailed {
                status: DownloadStatus::HARDWARE_ERROR,
            })
        ));
        // Block 0 landed, block 1 faulted, block 2 was never sent.
        assert_eq!(ctl.fw_blocks_seen(), 2);
    }

    #[test]
    fn busy_chip_is_rejected_unless_forced() {
        let (mut dev, ctl) = open_sim();
        ctl.set_fw_busy();

        let err = dev
            .fw_write(&image(100), Default::default(), |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::DownloadBusy)
        ));
    }

    #[test]
    fn toggle_flips_the_active_image() {
        let (mut dev, _ctl) = open_sim();
        assert!(dev.flash_part(FlashPartition::Img0).unwrap().active);
        dev.fw_toggle_active(true, false).unwrap();
        assert!(dev.flash_part(FlashPartition::Img1).unwrap().active);
    }
}
