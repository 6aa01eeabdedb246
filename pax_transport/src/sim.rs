// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory simulated switch.
//!
//! [`SimSwitch`] implements [`Backend`] against a full in-memory register
//! file and a model of the command set: echo, routing-id query, register
//! tunneling, firmware download, chunked dumps, die temperature, reset, and
//! port binding. The paired [`SimControl`] handle lets a test seed chip
//! state, inject faults (transport desynchronization, failing download
//! blocks, failing dumps), and observe every submission.
//!
//! The simulator accepts request payloads of any size so that block- and
//! chunk-sequencing properties can be exercised beyond the wire caps real
//! transports enforce.

use crate::Backend;
use crate::TransportError;
use crate::check_range;
use pax_proto::dump;
use pax_proto::fw;
use pax_proto::mrpc::BackgroundStatus;
use pax_proto::mrpc::CMD_MASK;
use pax_proto::mrpc::CommandId;
use pax_proto::mrpc::PAX_ID_MASK;
use pax_proto::mrpc::PAX_ID_SHIFT;
use pax_proto::mrpc::RetrySafety;
use pax_proto::mrpc::dietemp;
use pax_proto::regs;
use pax_proto::regs::GAS_MAP_SIZE;
use pax_proto::regs::GasAddress;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// A simulated switch backend.
pub struct SimSwitch {
    state: Arc<Mutex<SimState>>,
}

/// Test-side control over a [`SimSwitch`], shared with the backend.
#[derive(Clone)]
pub struct SimControl {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    regs: Vec<u8>,
    pending: Option<(u32, Vec<u8>)>,
    desync_once: bool,
    submits: Vec<u32>,

    local_pax: u8,
    die_temp_centi: u32,
    event_armed: bool,

    fw: FwState,
    dumps: HashMap<u32, Vec<u8>>,
    dump_session: Option<DumpSession>,
    dump_polls: u32,
    fail_dump: bool,
    dump_get_offsets: Vec<u16>,
}

struct FwState {
    dlstatus: fw::DownloadStatus,
    bgstatus: BackgroundStatus,
    img_len: u64,
    received: u64,
    dont_activate: bool,
    blocks_seen: usize,
    fail_block: Option<usize>,
}

struct DumpSession {
    cmd: u32,
    polls_left: u32,
    data: Vec<u8>,
}

impl SimSwitch {
    /// Creates a simulated switch and the control handle for it.
    pub fn new() -> (SimSwitch, SimControl) {
        let state = Arc::new(Mutex::new(SimState::new()));
        (
            SimSwitch {
                state: state.clone(),
            },
            SimControl { state },
        )
    }
}

impl SimState {
    fn new() -> Self {
        let mut state = SimState {
            regs: vec![0; GAS_MAP_SIZE],
            pending: None,
            desync_once: false,
            submits: Vec::new(),
            local_pax: 0,
            die_temp_centi: 4350,
            event_armed: false,
            fw: FwState {
                dlstatus: fw::DownloadStatus::READY,
                bgstatus: BackgroundStatus::IDLE,
                img_len: 0,
                received: 0,
                dont_activate: false,
                blocks_seen: 0,
                fail_block: None,
            },
            dumps: HashMap::new(),
            dump_session: None,
            dump_polls: 1,
            fail_dump: false,
            dump_get_offsets: Vec::new(),
        };

        state.poke8(regs::top::PARTITION_ID, 0);
        state.poke8(regs::top::PARTITION_COUNT, 1);
        state.poke8(regs::top::PFF_COUNT, 2);
        state.poke32(regs::sys_info::DEVICE_ID, 0x4100);
        state.poke32(regs::sys_info::FIRMWARE_VERSION, 0x0107_0123);
        state.poke16(regs::sys_info::IMG_RUNNING, regs::sys_info::IMG0_RUNNING);
        state.poke16(regs::sys_info::CFG_RUNNING, regs::sys_info::CFG0_RUNNING);

        // Flash partition map: two image and two config slots plus a log.
        for (pair, addr, len) in [
            (regs::flash_info::IMG0, 0x10_0000u32, 0x8_0000u32),
            (regs::flash_info::IMG1, 0x18_0000, 0x8_0000),
            (regs::flash_info::CFG0, 0x20_0000, 0x1_0000),
            (regs::flash_info::CFG1, 0x21_0000, 0x1_0000),
            (regs::flash_info::NVLOG, 0x22_0000, 0x2_0000),
        ] {
            state.poke32(pair, addr);
            state.poke32(pair.offset(4), len);
        }
        state.poke32(regs::flash_info::ACTIVE_IMG_ADDRESS, 0x10_0000);
        state.poke32(regs::flash_info::ACTIVE_CFG_ADDRESS, 0x20_0000);

        // PFF CSR blocks present for the first two functions.
        for i in 0..2 {
            state.poke16(
                regs::pff_csr::at(i).offset(regs::pff_csr::VENDOR_ID),
                regs::SWITCH_VENDOR_ID,
            );
        }

        state
    }

    fn poke8(&mut self, addr: GasAddress, val: u8) {
        self.regs[addr.0 as usize] = val;
    }

    fn poke16(&mut self, addr: GasAddress, val: u16) {
        self.regs[addr.0 as usize..addr.0 as usize + 2].copy_from_slice(&val.to_le_bytes());
    }

    fn poke32(&mut self, addr: GasAddress, val: u32) {
        self.regs[addr.0 as usize..addr.0 as usize + 4].copy_from_slice(&val.to_le_bytes());
    }

    fn execute(&mut self, word: u32, input: &[u8]) -> (u32, Vec<u8>) {
        const ERR_SUBCMD_INVALID: u32 = 0x64004;
        const ERR_CMD_INVALID: u32 = 0x64005;
        const ERR_PARAM_INVALID: u32 = 0x64006;

        match CommandId(word & CMD_MASK) {
            CommandId::ECHO => {
                let Ok(val) = <[u8; 4]>::try_from(input) else {
                    return (ERR_PARAM_INVALID, Vec::new());
                };
                let out = !u32::from_le_bytes(val);
                (0, out.to_le_bytes().to_vec())
            }
            CommandId::GET_PAX_ID => (0, (self.local_pax as u32).to_le_bytes().to_vec()),
            CommandId::RESET => (0, Vec::new()),
            CommandId::DIE_TEMP => {
                let Ok(sub) = <[u8; 4]>::try_from(input) else {
                    return (ERR_PARAM_INVALID, Vec::new());
                };
                match u32::from_le_bytes(sub) {
                    dietemp::SET_MEAS => (0, Vec::new()),
                    dietemp::GET => (0, self.die_temp_centi.to_le_bytes().to_vec()),
                    _ => (ERR_SUBCMD_INVALID, Vec::new()),
                }
            }
            CommandId::GAS_READ => {
                let Some((offset, len)) = parse_gas_span(input) else {
                    return (ERR_PARAM_INVALID, Vec::new());
                };
                if offset + len > self.regs.len() {
                    return (ERR_PARAM_INVALID, Vec::new());
                }
                (0, self.regs[offset..offset + len].to_vec())
            }
            CommandId::GAS_WRITE => {
                let Some((offset, len)) = parse_gas_span(input) else {
                    return (ERR_PARAM_INVALID, Vec::new());
                };
                if input.len() < 8 + len || offset + len > self.regs.len() {
                    return (ERR_PARAM_INVALID, Vec::new());
                }
                self.regs[offset..offset + len].copy_from_slice(&input[8..8 + len]);
                (0, Vec::new())
            }
            CommandId::FW_DOWNLOAD => self.fw_command(input),
            CommandId::TOPO_INFO_DUMP | CommandId::GFMS_DB_DUMP | CommandId::LOG_DUMP => {
                self.dump_command(word & CMD_MASK, input)
            }
            CommandId::PORT_PART_P2P => match input.first() {
                Some(&pax_proto::mrpc::bind::INFO) => (0, vec![0; 8]),
                Some(&pax_proto::mrpc::bind::BIND) | Some(&pax_proto::mrpc::bind::UNBIND) => {
                    (0, vec![0; 4])
                }
                _ => (ERR_SUBCMD_INVALID, Vec::new()),
            },
            _ => (ERR_CMD_INVALID, Vec::new()),
        }
    }

    fn fw_command(&mut self, input: &[u8]) -> (u32, Vec<u8>) {
        match input.first() {
            Some(&fw::subcmd::GET_STATUS) => {
                let reply = fw::StatusReply {
                    dlstatus: self.fw.dlstatus.0,
                    bgstatus: self.fw.bgstatus.0,
                    reserved: 0.into(),
                };
                (0, reply.as_bytes().to_vec())
            }
            Some(&fw::subcmd::DOWNLOAD) => {
                let Ok((hdr, data)) = fw::BlockHeader::read_from_prefix(input) else {
                    return (0x64006, Vec::new());
                };
                self.fw_block(&hdr, data);
                (0, Vec::new())
            }
            Some(&fw::subcmd::TOGGLE) => {
                // Swap the partitions selected for the next boot.
                let img0 = self.peek32(regs::flash_info::IMG0);
                let img1 = self.peek32(regs::flash_info::IMG1);
                let active = self.peek32(regs::flash_info::ACTIVE_IMG_ADDRESS);
                let other = if active == img0 { img1 } else { img0 };
                self.poke32(regs::flash_info::ACTIVE_IMG_ADDRESS, other);
                (0, Vec::new())
            }
            _ => (0x64004, Vec::new()),
        }
    }

    fn fw_block(&mut self, hdr: &fw::BlockHeader, data: &[u8]) {
        let block = self.fw.blocks_seen;
        self.fw.blocks_seen += 1;

        if self.fw.fail_block == Some(block) {
            self.fw.bgstatus = BackgroundStatus::ERROR;
            return;
        }

        // A block at offset zero starts a fresh download.
        if hdr.offset.get() == 0 {
            self.fw.received = 0;
        }

        if hdr.offset.get() as u64 != self.fw.received {
            self.fw.dlstatus = fw::DownloadStatus::OFFSET_INCORRECT;
            self.fw.bgstatus = BackgroundStatus::DONE;
            return;
        }
        if hdr.blk_length.get() as usize != data.len() {
            self.fw.dlstatus = fw::DownloadStatus::LENGTH_INCORRECT;
            self.fw.bgstatus = BackgroundStatus::DONE;
            return;
        }

        if self.fw.received == 0 {
            self.fw.img_len = hdr.img_length.get() as u64;
            self.fw.dont_activate = hdr.dont_activate != 0;
        }
        self.fw.received += hdr.blk_length.get() as u64;
        self.fw.bgstatus = BackgroundStatus::DONE;
        self.fw.dlstatus = if self.fw.received >= self.fw.img_len {
            if self.fw.dont_activate {
                fw::DownloadStatus::COMPLETE
            } else {
                fw::DownloadStatus::ACTIVATED_AS_FIRMWARE
            }
        } else {
            fw::DownloadStatus::IN_PROGRESS
        };
    }

    fn dump_command(&mut self, cmd: u32, input: &[u8]) -> (u32, Vec<u8>) {
        match input.first() {
            Some(&dump::subcmd::START) => {
                let mut data = self.dumps.get(&cmd).cloned().unwrap_or_default();
                // The chip assembles in doubleword units.
                while data.len() % 4 != 0 {
                    data.push(0);
                }
                // A start with a live session simply overwrites it.
                self.dump_session = Some(DumpSession {
                    cmd,
                    polls_left: self.dump_polls,
                    data,
                });
                (0, vec![dump::DumpStatus::IN_PROGRESS.0])
            }
            Some(&dump::subcmd::STATUS) => {
                let reply = match &mut self.dump_session {
                    None => dump::StatusReply {
                        status: dump::DumpStatus::NOT_STARTED.0,
                        reserved: 0,
                        data_len_dw: 0.into(),
                    },
                    Some(session) if session.cmd != cmd => dump::StatusReply {
                        status: dump::DumpStatus::NOT_STARTED.0,
                        reserved: 0,
                        data_len_dw: 0.into(),
                    },
                    Some(session) => {
                        if session.polls_left > 0 {
                            session.polls_left -= 1;
                            dump::StatusReply {
                                status: dump::DumpStatus::IN_PROGRESS.0,
                                reserved: 0,
                                data_len_dw: 0.into(),
                            }
                        } else if self.fail_dump {
                            dump::StatusReply {
                                status: dump::DumpStatus::FAILED.0,
                                reserved: 0,
                                data_len_dw: 0.into(),
                            }
                        } else {
                            dump::StatusReply {
                                status: dump::DumpStatus::READY.0,
                                reserved: 0,
                                data_len_dw: ((session.data.len() / 4) as u16).into(),
                            }
                        }
                    }
                };
                (0, reply.as_bytes().to_vec())
            }
            Some(&dump::subcmd::GET) => {
                let Ok(req) = dump::ChunkRequest::read_from_bytes(input) else {
                    return (0x64006, Vec::new());
                };
                self.dump_get_offsets.push(req.offset.get());
                let Some(session) = self.dump_session.as_ref().filter(|s| s.cmd == cmd) else {
                    return (0x64004, Vec::new());
                };
                let offset = req.offset.get() as usize;
                if offset >= session.data.len() {
                    return (0x64006, Vec::new());
                }
                let len = (session.data.len() - offset).min(dump::CHUNK_DATA_MAX);
                let hdr = dump::ChunkReplyHeader {
                    status: dump::DumpStatus::READY.0,
                    reserved: 0,
                    data_len_dw: ((len / 4) as u16).into(),
                };
                let mut reply = hdr.as_bytes().to_vec();
                reply.extend_from_slice(&session.data[offset..offset + len]);
                (0, reply)
            }
            Some(&dump::subcmd::FINISH) => {
                let status = if self.dump_session.take().is_some() {
                    dump::DumpStatus::READY
                } else {
                    dump::DumpStatus::NOT_STARTED
                };
                (0, vec![status.0])
            }
            _ => (0x64004, Vec::new()),
        }
    }

    fn peek32(&self, addr: GasAddress) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.regs[addr.0 as usize..addr.0 as usize + 4]);
        u32::from_le_bytes(bytes)
    }
}

fn parse_gas_span(input: &[u8]) -> Option<(usize, usize)> {
    if input.len() < 8 {
        return None;
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&input[..4]);
    let offset = u32::from_le_bytes(word) as usize;
    word.copy_from_slice(&input[4..8]);
    let len = u32::from_le_bytes(word) as usize;
    Some((offset, len))
}

impl Backend for SimSwitch {
    fn submit(
        &mut self,
        cmd: u32,
        input: &[u8],
        _resp_len: usize,
        _safety: RetrySafety,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.submits.push(cmd);

        if state.desync_once {
            state.desync_once = false;
            // The stale response of the interrupted exchange.
            state.pending = Some((0, Vec::new()));
            return Err(TransportError::Desynchronized);
        }

        let (ret, output) = state.execute(cmd, input);
        state.pending = Some((ret, output));
        Ok(())
    }

    fn collect(&mut self, output: &mut [u8]) -> Result<u32, TransportError> {
        let mut state = self.state.lock().unwrap();
        let (ret, data) = state
            .pending
            .take()
            .ok_or(TransportError::Malformed("no response pending"))?;
        let n = output.len().min(data.len());
        output[..n].copy_from_slice(&data[..n]);
        output[n..].fill(0);
        Ok(ret)
    }

    fn gas_read8(&mut self, addr: GasAddress) -> Result<u8, TransportError> {
        let state = self.state.lock().unwrap();
        let offset = check_range(addr, 1, state.regs.len())?;
        Ok(state.regs[offset])
    }

    fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError> {
        let mut bytes = [0u8; 2];
        self.gas_read_block(addr, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError> {
        let mut bytes = [0u8; 4];
        self.gas_read_block(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError> {
        let mut bytes = [0u8; 8];
        self.gas_read_block(addr, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError> {
        self.gas_write_block(addr, &[val])
    }

    fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError> {
        self.gas_write_block(addr, &val.to_le_bytes())
    }

    fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.gas_write_block(addr, &val.to_le_bytes())
    }

    fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError> {
        self.gas_write_block(addr, &val.to_le_bytes())
    }

    fn gas_read_block(
        &mut self,
        addr: GasAddress,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        let state = self.state.lock().unwrap();
        let offset = check_range(addr, buf.len(), state.regs.len())?;
        buf.copy_from_slice(&state.regs[offset..offset + buf.len()]);
        Ok(())
    }

    fn gas_write_block(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        let offset = check_range(addr, data.len(), state.regs.len())?;
        state.regs[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn event_wait(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.event_armed {
                    state.event_armed = false;
                    return Ok(true);
                }
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Ok(false),
                _ => std::thread::sleep(Duration::from_millis(1)),
            }
        }
    }
}

impl SimControl {
    /// Seeds the data a dump op-code will serve.
    pub fn set_dump(&self, cmd: CommandId, data: Vec<u8>) {
        self.state.lock().unwrap().dumps.insert(cmd.0, data);
    }

    /// Number of status polls that report in-progress before a dump turns
    /// ready.
    pub fn set_dump_polls(&self, polls: u32) {
        self.state.lock().unwrap().dump_polls = polls;
    }

    /// Makes every dump end in the failed status.
    pub fn fail_dumps(&self) {
        self.state.lock().unwrap().fail_dump = true;
    }

    /// Fails the next submission with a desynchronization condition and
    /// leaves a stale response pending, as an interrupted exchange would.
    pub fn inject_desync(&self) {
        self.state.lock().unwrap().desync_once = true;
    }

    /// Every command word submitted so far, including failed submissions.
    pub fn submits(&self) -> Vec<u32> {
        self.state.lock().unwrap().submits.clone()
    }

    /// How many submissions carried `cmd` as their base op-code.
    pub fn submit_count(&self, cmd: CommandId) -> usize {
        self.state
            .lock()
            .unwrap()
            .submits
            .iter()
            .filter(|&&word| word & CMD_MASK == cmd.0)
            .count()
    }

    /// The routing target of the most recent submission.
    pub fn last_routed_pax(&self) -> Option<u8> {
        self.state
            .lock()
            .unwrap()
            .submits
            .last()
            .map(|&word| ((word >> PAX_ID_SHIFT) & PAX_ID_MASK) as u8)
    }

    /// Sets the PAX id the switch reports for itself.
    pub fn set_local_pax(&self, pax: u8) {
        self.state.lock().unwrap().local_pax = pax;
    }

    /// Arms one event notification for the next event wait.
    pub fn arm_event(&self) {
        self.state.lock().unwrap().event_armed = true;
    }

    /// Sets the reported die temperature in hundredths of a degree.
    pub fn set_die_temp(&self, centi: u32) {
        self.state.lock().unwrap().die_temp_centi = centi;
    }

    /// Fails the `block`-th download block (zero-based) with a background
    /// hardware error.
    pub fn fail_fw_block_at(&self, block: usize) {
        self.state.lock().unwrap().fw.fail_block = Some(block);
    }

    /// Marks a download as already in progress.
    pub fn set_fw_busy(&self) {
        self.state.lock().unwrap().fw.dlstatus = fw::DownloadStatus::IN_PROGRESS;
    }

    /// Number of download blocks the switch accepted so far.
    pub fn fw_blocks_seen(&self) -> usize {
        self.state.lock().unwrap().fw.blocks_seen
    }

    /// Byte offsets of every chunk fetched from a dump session.
    pub fn dump_get_offsets(&self) -> Vec<u16> {
        self.state.lock().unwrap().dump_get_offsets.clone()
    }

    /// Writes raw bytes into the register file.
    pub fn poke(&self, addr: GasAddress, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let offset = addr.0 as usize;
        state.regs[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Reads raw bytes out of the register file.
    pub fn peek(&self, addr: GasAddress, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let offset = addr.0 as usize;
        state.regs[offset..offset + len].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_complements() {
        let (mut sim, _) = SimSwitch::new();
        sim.submit(0x41, &0x1234_5678u32.to_le_bytes(), 4, RetrySafety::Safe)
            .unwrap();
        let mut out = [0u8; 4];
        assert_eq!(sim.collect(&mut out).unwrap(), 0);
        assert_eq!(u32::from_le_bytes(out), !0x1234_5678u32);
    }

    #[test]
    fn desync_is_one_shot() {
        let (mut sim, ctl) = SimSwitch::new();
        ctl.inject_desync();
        assert!(matches!(
            sim.submit(0x41, &[0; 4], 4, RetrySafety::Safe),
            Err(TransportError::Desynchronized)
        ));
        // Drain the stale response, then the resend goes through.
        sim.collect(&mut []).unwrap();
        sim.submit(0x41, &[0; 4], 4, RetrySafety::Safe).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(sim.collect(&mut out).unwrap(), 0);
        assert_eq!(ctl.submit_count(CommandId::ECHO), 2);
    }

    #[test]
    fn register_file_round_trips() {
        let (mut sim, _) = SimSwitch::new();
        sim.gas_write32(GasAddress(0x3000), 0xabcd_ef01).unwrap();
        assert_eq!(sim.gas_read32(GasAddress(0x3000)).unwrap(), 0xabcd_ef01);
        assert_eq!(sim.gas_read8(GasAddress(0x3001)).unwrap(), 0xef);
    }
}
