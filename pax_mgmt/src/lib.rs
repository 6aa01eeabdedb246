// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Management library for PAX PCIe fabric switches.
//!
//! A [`Switch`] is an exclusive handle on one management channel to a
//! switch, over any of the supported transports (character device, I2C,
//! serial console, or the network management service). All chip
//! capabilities are expressed as MRPC commands plus direct register
//! access; this crate layers the command engine, the register access
//! layer, the chunked bulk-transfer protocol, firmware image transfer, and
//! the event subsystem on top of the uniform transport contract.
//!
//! Every operation is a synchronous, blocking call on the caller's thread;
//! the handle is a single-slot command channel and is `&mut` throughout.
//!
//! ```no_run
//! # fn main() -> pax_mgmt::Result<()> {
//! let mut switch = pax_mgmt::Switch::open("/dev/pax0")?;
//! println!("firmware {}", switch.firmware_version()?);
//! assert_eq!(switch.echo(0xdead_beef)?, !0xdead_beef);
//! # Ok(())
//! # }
//! ```

mod bulk;
mod cmd;
mod error;
mod event;
mod fabric;
mod fw;
mod gas;
mod log;

pub use error::Error;
pub use error::ProtocolViolation;
pub use error::Result;
pub use error::SwitchError;
pub use event::EventControl;
pub use fabric::PortBinding;
pub use fw::DownloadOptions;
pub use log::LogKind;

pub use pax_proto::event::EventFlags;
pub use pax_proto::event::EventId;
pub use pax_proto::event::EventIndex;
pub use pax_proto::event::EventSummary;
pub use pax_proto::event::EventTier;
pub use pax_proto::fw::DownloadStatus;
pub use pax_proto::mrpc::CommandId;
pub use pax_proto::regs::GasAddress;
pub use pax_transport::Backend;
pub use pax_transport::TransportError;

use pax_proto::mrpc::CommandId as Cmd;
use pax_proto::mrpc::PAX_ID_LOCAL;
use pax_proto::mrpc::PAX_ID_MASK;
use pax_proto::mrpc::dietemp;
use pax_proto::regs;
use std::time::Duration;

/// Pacing of the status-polling loops (chunked dumps, firmware download,
/// event waits without transport support).
///
/// Tests inject a zero interval to run the loops at full speed; the
/// iteration budget bounds every loop so a wedged chip cannot hang the
/// caller forever.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Sleep between two polls.
    pub interval: Duration,
    /// Maximum polls before [`ProtocolViolation::PollBudget`].
    pub max_polls: u32,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            interval: Duration::from_millis(5),
            max_polls: 6000,
        }
    }
}

/// An exclusive handle on one switch management channel.
pub struct Switch {
    pub(crate) backend: Box<dyn Backend>,
    name: String,
    /// Routing target of every command; [`PAX_ID_LOCAL`] means unrouted.
    pub(crate) pax_id: u8,
    /// The switch's own fabric index, learned on the first
    /// [`set_pax_id`](Switch::set_pax_id).
    pub(crate) local_pax_id: Option<u8>,
    pub(crate) partition: u8,
    pub(crate) partition_count: u8,
    pub(crate) pacing: Pacing,
}

impl Switch {
    /// Opens a switch from a device string.
    ///
    /// Accepted forms:
    /// - a filesystem path to the management character device
    ///   (`/dev/pax0`),
    /// - `i2c://<adapter path>@<slave address>` (`i2c:///dev/i2c-1@0x34`),
    /// - `uart://<serial device path>`,
    /// - `tcp://<host>:<port>`.
    pub fn open(device: &str) -> Result<Switch> {
        if let Some(rest) = device.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or(Error::Invalid("tcp device string without a port"))?;
            let port = port
                .parse()
                .map_err(|_| Error::Invalid("unparsable tcp port"))?;
            return Switch::open_tcp(host, port);
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(rest) = device.strip_prefix("i2c://") {
                let (path, addr) = rest
                    .rsplit_once('@')
                    .ok_or(Error::Invalid("i2c device string without a slave address"))?;
                let addr = parse_int(addr)
                    .ok_or(Error::Invalid("unparsable i2c slave address"))?;
                return Switch::open_i2c(std::path::Path::new(path), addr);
            }
            if let Some(rest) = device.strip_prefix("uart://") {
                return Switch::open_uart(std::path::Path::new(rest));
            }
            if device.contains('/') {
                return Switch::open_chardev(std::path::Path::new(device));
            }
        }

        Err(Error::Invalid("unrecognized device string"))
    }

    /// Opens the management character device at `path`.
    #[cfg(target_os = "linux")]
    pub fn open_chardev(path: &std::path::Path) -> Result<Switch> {
        let backend = pax_transport::chardev::CharDevice::open(path)?;
        Switch::from_backend(Box::new(backend), path.display().to_string())
    }

    /// Opens a switch behind the I2C adapter at `path`, slave `addr`.
    #[cfg(target_os = "linux")]
    pub fn open_i2c(path: &std::path::Path, addr: u16) -> Result<Switch> {
        let backend = pax_transport::i2c::I2cDevice::open(path, addr)?;
        Switch::from_backend(
            Box::new(backend),
            format!("{}@{addr:#x}", path.display()),
        )
    }

    /// Opens a switch behind the serial console at `path`.
    #[cfg(target_os = "linux")]
    pub fn open_uart(path: &std::path::Path) -> Result<Switch> {
        let backend = pax_transport::uart::UartConsole::open(path)?;
        Switch::from_backend(Box::new(backend), path.display().to_string())
    }

    /// Connects to the network management service at `host:port`.
    pub fn open_tcp(host: &str, port: u16) -> Result<Switch> {
        let backend = pax_transport::tcp::TcpChannel::connect(host, port)?;
        Switch::from_backend(Box::new(backend), format!("{host}:{port}"))
    }

    /// Wraps an already constructed backend.
    pub fn from_backend(backend: Box<dyn Backend>, name: impl Into<String>) -> Result<Switch> {
        let mut switch = Switch {
            backend,
            name: name.into(),
            pax_id: PAX_ID_LOCAL,
            local_pax_id: None,
            partition: 0,
            partition_count: 1,
            pacing: Pacing::default(),
        };

        // Partition placement is advisory; a handle without register
        // privilege still runs commands.
        match switch.read_partition_info() {
            Ok(()) => {}
            Err(err) => tracing::debug!(
                name = %switch.name,
                error = &err as &dyn std::error::Error,
                "partition info unavailable"
            ),
        }
        Ok(switch)
    }

    fn read_partition_info(&mut self) -> Result<(), TransportError> {
        self.partition = self.backend.gas_read8(regs::top::PARTITION_ID)?;
        self.partition_count = self.backend.gas_read8(regs::top::PARTITION_COUNT)?;
        Ok(())
    }

    /// The string this handle was opened from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The partition the management channel is attached to.
    pub fn partition(&self) -> u8 {
        self.partition
    }

    /// Number of partitions configured on the switch.
    pub fn partition_count(&self) -> u8 {
        self.partition_count
    }

    /// Replaces the pacing of every polling loop on this handle.
    pub fn set_pacing(&mut self, pacing: Pacing) {
        self.pacing = pacing;
    }

    /// Routes all subsequent commands and register access to the fabric
    /// node `pax`.
    ///
    /// The first call asks the attached switch for its own fabric index so
    /// the register access layer can tell local from remote targets.
    pub fn set_pax_id(&mut self, pax: u8) -> Result<()> {
        if pax as u32 >= PAX_ID_MASK {
            return Err(Error::Invalid("fabric index out of range"));
        }
        if self.local_pax_id.is_none() {
            let reply: [u8; 4] = self.command_reply(Cmd::GET_PAX_ID, &[])?;
            self.local_pax_id = Some((u32::from_le_bytes(reply) & PAX_ID_MASK) as u8);
        }
        self.pax_id = pax;
        Ok(())
    }

    /// Routes all subsequent traffic back to the attached switch.
    pub fn set_pax_local(&mut self) {
        self.pax_id = PAX_ID_LOCAL;
    }

    /// The configured routing target, if any.
    pub fn pax_id(&self) -> Option<u8> {
        (self.pax_id != PAX_ID_LOCAL).then_some(self.pax_id)
    }

    /// The attached switch's own fabric index, once learned.
    pub fn local_pax_id(&self) -> Option<u8> {
        self.local_pax_id
    }

    /// Echo: the switch answers with the bitwise complement of `input`.
    pub fn echo(&mut self, input: u32) -> Result<u32> {
        let reply: [u8; 4] = self.command_reply(Cmd::ECHO, &input.to_le_bytes())?;
        Ok(u32::from_le_bytes(reply))
    }

    /// Hard-resets the switch. On systems without hotplug support the
    /// device may be unusable until reboot.
    pub fn hard_reset(&mut self) -> Result<()> {
        let subcmd = 0u32;
        self.command(Cmd::RESET, &subcmd.to_le_bytes(), &mut [])
    }

    /// Latches and reads the die temperature, in degrees Celsius.
    pub fn die_temp(&mut self) -> Result<f64> {
        self.command(Cmd::DIE_TEMP, &dietemp::SET_MEAS.to_le_bytes(), &mut [])?;
        let reply: [u8; 4] = self.command_reply(Cmd::DIE_TEMP, &dietemp::GET.to_le_bytes())?;
        Ok(u32::from_le_bytes(reply) as f64 / 100.0)
    }

    /// The switch's device id.
    pub fn device_id(&mut self) -> Result<u32> {
        self.gas_read32(regs::sys_info::DEVICE_ID)
    }

    /// The running firmware version, rendered the way the chip tools print
    /// it.
    pub fn firmware_version(&mut self) -> Result<String> {
        let version = self.gas_read32(regs::sys_info::FIRMWARE_VERSION)?;
        Ok(format!(
            "{:x}.{:02x} B{:03X}",
            version >> 24,
            (version >> 16) & 0xff,
            version & 0xffff
        ))
    }

    /// Address, length, and activity flags of one flash partition.
    pub fn flash_part(&mut self, part: FlashPartition) -> Result<FlashPartInfo> {
        use regs::flash_info;
        use regs::sys_info;

        let (pair, active_reg, running) = match part {
            FlashPartition::Img0 => (
                flash_info::IMG0,
                Some(flash_info::ACTIVE_IMG_ADDRESS),
                Some((sys_info::IMG_RUNNING, sys_info::IMG0_RUNNING)),
            ),
            FlashPartition::Img1 => (
                flash_info::IMG1,
                Some(flash_info::ACTIVE_IMG_ADDRESS),
                Some((sys_info::IMG_RUNNING, sys_info::IMG1_RUNNING)),
            ),
            FlashPartition::Cfg0 => (
                flash_info::CFG0,
                Some(flash_info::ACTIVE_CFG_ADDRESS),
                Some((sys_info::CFG_RUNNING, sys_info::CFG0_RUNNING)),
            ),
            FlashPartition::Cfg1 => (
                flash_info::CFG1,
                Some(flash_info::ACTIVE_CFG_ADDRESS),
                Some((sys_info::CFG_RUNNING, sys_info::CFG1_RUNNING)),
            ),
            FlashPartition::Nvlog => (flash_info::NVLOG, None, None),
        };

        let address = self.gas_read32(pair)?;
        let length = self.gas_read32(pair.offset(4))?;

        let active = match active_reg {
            Some(reg) => self.gas_read32(reg)? == address,
            None => false,
        };
        let running = match running {
            Some((reg, val)) => self.gas_read16(reg)? == val,
            None => false,
        };

        Ok(FlashPartInfo {
            address,
            length,
            active,
            running,
        })
    }

    /// Resolves a port-function index to its (partition, port) pair.
    pub fn pff_to_port(&mut self, pff: u32) -> Result<(u8, u32)> {
        use regs::part_cfg;

        for part in 0..self.partition_count {
            let base = part_cfg::at(part);
            if self.gas_read32(base.offset(part_cfg::USP_PFF_INST_ID))? == pff {
                return Ok((part, 0));
            }
            if self.gas_read32(base.offset(part_cfg::VEP_PFF_INST_ID))? == pff {
                return Ok((part, part_cfg::VEP_PORT));
            }
            for dsp in 0..part_cfg::DSP_PFF_COUNT {
                let reg = base.offset(part_cfg::DSP_PFF_INST_ID + dsp * 4);
                if self.gas_read32(reg)? == pff {
                    return Ok((part, dsp + 1));
                }
            }
        }
        Err(Error::Invalid("no port function with that index"))
    }

    /// Resolves a (partition, port) pair to its port-function index.
    /// `partition` of `None` means the handle's own partition.
    pub fn port_to_pff(&mut self, partition: Option<u8>, port: u32) -> Result<u32> {
        use regs::part_cfg;

        let partition = partition.unwrap_or(self.partition);
        if partition >= self.partition_count {
            return Err(Error::Invalid("partition out of range"));
        }

        let base = part_cfg::at(partition);
        let reg = match port {
            0 => base.offset(part_cfg::USP_PFF_INST_ID),
            part_cfg::VEP_PORT => base.offset(part_cfg::VEP_PFF_INST_ID),
            1..=part_cfg::DSP_PFF_COUNT => {
                base.offset(part_cfg::DSP_PFF_INST_ID + (port - 1) * 4)
            }
            _ => return Err(Error::Invalid("port out of range")),
        };
        self.gas_read32(reg)
    }
}

/// The flash partitions the firmware map describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPartition {
    /// Firmware image slot 0.
    Img0,
    /// Firmware image slot 1.
    Img1,
    /// Configuration slot 0.
    Cfg0,
    /// Configuration slot 1.
    Cfg1,
    /// The non-volatile log partition.
    Nvlog,
}

/// Location and activity of one flash partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashPartInfo {
    /// Flash byte address of the partition.
    pub address: u32,
    /// Partition length in bytes.
    pub length: u32,
    /// Whether this partition is selected for the next boot.
    pub active: bool,
    /// Whether the switch is currently running out of this partition.
    pub running: bool,
}

#[cfg(target_os = "linux")]
fn parse_int(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix("0x") {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pax_transport::sim::SimControl;
    use pax_transport::sim::SimSwitch;

    pub(crate) fn open_sim() -> (Switch, SimControl) {
        let (sim, ctl) = SimSwitch::new();
        let mut dev = Switch::from_backend(Box::new(sim), "sim").unwrap();
        dev.set_pacing(Pacing {
            interval: Duration::ZERO,
            max_polls: 1000,
        });
        (dev, ctl)
    }

    #[test]
    fn identity_reads() {
        let (mut dev, _ctl) = open_sim();
        assert_eq!(dev.device_id().unwrap(), 0x4100);
        assert_eq!(dev.firmware_version().unwrap(), "1.07 B123");
        assert_eq!(dev.partition(), 0);
        assert_eq!(dev.partition_count(), 1);
    }

    #[test]
    fn echo_and_die_temp() {
        let (mut dev, ctl) = open_sim();
        assert_eq!(dev.echo(0x0f0f_0f0f).unwrap(), 0xf0f0_f0f0);
        ctl.set_die_temp(5150);
        assert_eq!(dev.die_temp().unwrap(), 51.5);
    }

    #[test]
    fn flash_partition_map() {
        let (mut dev, _ctl) = open_sim();
        let img0 = dev.flash_part(FlashPartition::Img0).unwrap();
        assert!(img0.active);
        assert!(img0.running);
        assert_eq!(img0.address, 0x10_0000);

        let img1 = dev.flash_part(FlashPartition::Img1).unwrap();
        assert!(!img1.active);
        assert!(!img1.running);

        let nvlog = dev.flash_part(FlashPartition::Nvlog).unwrap();
        assert_eq!(nvlog.length, 0x2_0000);
    }

    #[test]
    fn target_selection_learns_the_local_index() {
        let (mut dev, ctl) = open_sim();
        ctl.set_local_pax(2);
        assert_eq!(dev.pax_id(), None);

        dev.set_pax_id(7).unwrap();
        assert_eq!(dev.pax_id(), Some(7));
        assert_eq!(dev.local_pax_id(), Some(2));

        dev.set_pax_local();
        assert_eq!(dev.pax_id(), None);
        // The learned local index survives target changes.
        assert_eq!(dev.local_pax_id(), Some(2));
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        let (mut dev, _ctl) = open_sim();
        assert!(matches!(dev.set_pax_id(0x1f), Err(Error::Invalid(_))));
    }
}
