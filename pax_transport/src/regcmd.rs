// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MRPC execution against the raw register file.
//!
//! Transports whose only path to the switch is register access (SMBus,
//! serial console, network register tunneling) run commands the way the
//! hardware defines them: copy the request into the MRPC input buffer,
//! write the command register to start execution, poll the status register
//! until it leaves in-progress, then read the result code and output
//! buffer.

use crate::Backend;
use crate::TransportError;
use pax_proto::mrpc::MRPC_MAX_DATA_LEN;
use pax_proto::mrpc::MrpcStatus;
use pax_proto::mrpc::RetrySafety;
use pax_proto::regs;
use std::time::Duration;

/// Delay between two polls of the MRPC status register, chosen to avoid
/// interrupting the switch firmware more than necessary.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Copies the request into the input buffer and triggers execution.
pub fn submit<B: Backend + ?Sized>(
    backend: &mut B,
    cmd: u32,
    input: &[u8],
    safety: RetrySafety,
) -> Result<(), TransportError> {
    if input.len() > MRPC_MAX_DATA_LEN {
        return Err(TransportError::OutOfRange {
            offset: regs::mrpc::INPUT_DATA.0,
            len: input.len(),
        });
    }

    if !input.is_empty() {
        backend.gas_write_block(regs::mrpc::INPUT_DATA, input)?;
    }

    // Writing the command register starts execution. A transport with
    // bus-level write retry could trigger an irreversible command twice, so
    // those commands go through the exactly-once write.
    match safety {
        RetrySafety::Safe => backend.gas_write32(regs::mrpc::CMD, cmd),
        RetrySafety::NoRetry => backend.gas_write32_once(regs::mrpc::CMD, cmd),
    }
}

/// Polls the status register every `poll` until the command completes, then
/// returns the result code and copies out `output.len()` response bytes.
pub fn collect<B: Backend + ?Sized>(
    backend: &mut B,
    output: &mut [u8],
    poll: Duration,
) -> Result<u32, TransportError> {
    let status = loop {
        if !poll.is_zero() {
            std::thread::sleep(poll);
        }

        let status = MrpcStatus(backend.gas_read32(regs::mrpc::STATUS)?);
        if status != MrpcStatus::IN_PROGRESS {
            break status;
        }
    };

    match status {
        MrpcStatus::INTERRUPTED => return Err(TransportError::Interrupted),
        MrpcStatus::ERROR => {
            let ret = backend.gas_read32(regs::mrpc::RET_VALUE)?;
            if ret == 0 {
                return Err(TransportError::Malformed(
                    "MRPC error status without a result code",
                ));
            }
            return Ok(ret);
        }
        MrpcStatus::DONE => {}
        _ => return Err(TransportError::Malformed("unknown MRPC status")),
    }

    let ret = backend.gas_read32(regs::mrpc::RET_VALUE)?;
    if !output.is_empty() {
        backend.gas_read_block(regs::mrpc::OUTPUT_DATA, output)?;
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pax_proto::regs::GAS_MAP_SIZE;
    use pax_proto::regs::GasAddress;

    /// A register file with a one-command chip model behind it: writing the
    /// command register executes immediately.
    struct RegFile {
        mem: Vec<u8>,
        plain_cmd_writes: u32,
        once_cmd_writes: u32,
    }

    impl RegFile {
        fn new() -> Self {
            RegFile {
                mem: vec![0; GAS_MAP_SIZE],
                plain_cmd_writes: 0,
                once_cmd_writes: 0,
            }
        }

        fn execute(&mut self, cmd: u32) {
            let ret: u32;
            match cmd & pax_proto::mrpc::CMD_MASK {
                // Echo: complement the first input word.
                0x41 => {
                    let mut word = [0u8; 4];
                    word.copy_from_slice(&self.mem[0..4]);
                    let out = !u32::from_le_bytes(word);
                    self.mem[0x400..0x404].copy_from_slice(&out.to_le_bytes());
                    ret = 0;
                }
                _ => ret = 0x64005,
            }
            let status = if ret == 0 {
                MrpcStatus::DONE
            } else {
                MrpcStatus::ERROR
            };
            self.mem[0x804..0x808].copy_from_slice(&status.0.to_le_bytes());
            self.mem[0x808..0x80c].copy_from_slice(&ret.to_le_bytes());
        }
    }

    impl Backend for RegFile {
        fn submit(
            &mut self,
            cmd: u32,
            input: &[u8],
            _resp_len: usize,
            safety: RetrySafety,
        ) -> Result<(), TransportError> {
            submit(self, cmd, input, safety)
        }

        fn collect(&mut self, output: &mut [u8]) -> Result<u32, TransportError> {
            collect(self, output, Duration::ZERO)
        }

        fn gas_read8(&mut self, addr: GasAddress) -> Result<u8, TransportError> {
            Ok(self.mem[addr.0 as usize])
        }

        fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError> {
            let mut b = [0; 2];
            b.copy_from_slice(&self.mem[addr.0 as usize..addr.0 as usize + 2]);
            Ok(u16::from_le_bytes(b))
        }

        fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError> {
            let mut b = [0; 4];
            b.copy_from_slice(&self.mem[addr.0 as usize..addr.0 as usize + 4]);
            Ok(u32::from_le_bytes(b))
        }

        fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError> {
            let mut b = [0; 8];
            b.copy_from_slice(&self.mem[addr.0 as usize..addr.0 as usize + 8]);
            Ok(u64::from_le_bytes(b))
        }

        fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError> {
            self.mem[addr.0 as usize] = val;
            Ok(())
        }

        fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError> {
            self.mem[addr.0 as usize..addr.0 as usize + 2]
                .copy_from_slice(&val.to_le_bytes());
            Ok(())
        }

        fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
            self.mem[addr.0 as usize..addr.0 as usize + 4]
                .copy_from_slice(&val.to_le_bytes());
            if addr == regs::mrpc::CMD {
                self.plain_cmd_writes += 1;
                self.execute(val);
            }
            Ok(())
        }

        fn gas_write32_once(
            &mut self,
            addr: GasAddress,
            val: u32,
        ) -> Result<(), TransportError> {
            self.mem[addr.0 as usize..addr.0 as usize + 4]
                .copy_from_slice(&val.to_le_bytes());
            if addr == regs::mrpc::CMD {
                self.once_cmd_writes += 1;
                self.execute(val);
            }
            Ok(())
        }

        fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError> {
            self.mem[addr.0 as usize..addr.0 as usize + 8]
                .copy_from_slice(&val.to_le_bytes());
            Ok(())
        }

        fn gas_read_block(
            &mut self,
            addr: GasAddress,
            buf: &mut [u8],
        ) -> Result<(), TransportError> {
            buf.copy_from_slice(&self.mem[addr.0 as usize..addr.0 as usize + buf.len()]);
            Ok(())
        }

        fn gas_write_block(
            &mut self,
            addr: GasAddress,
            data: &[u8],
        ) -> Result<(), TransportError> {
            self.mem[addr.0 as usize..addr.0 as usize + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn event_wait(&mut self, _timeout: Option<Duration>) -> Result<bool, TransportError> {
            Err(TransportError::NotSupported)
        }
    }

    #[test]
    fn echo_round_trip() {
        let mut regs = RegFile::new();
        submit(&mut regs, 0x41, &0xdead_beef_u32.to_le_bytes(), RetrySafety::Safe).unwrap();
        let mut out = [0u8; 4];
        let ret = collect(&mut regs, &mut out, Duration::ZERO).unwrap();
        assert_eq!(ret, 0);
        assert_eq!(u32::from_le_bytes(out), !0xdead_beef_u32);
        assert_eq!(regs.plain_cmd_writes, 1);
        assert_eq!(regs.once_cmd_writes, 0);
    }

    #[test]
    fn chip_error_is_returned_not_raised() {
        let mut regs = RegFile::new();
        submit(&mut regs, 0x7777, &[], RetrySafety::Safe).unwrap();
        let ret = collect(&mut regs, &mut [], Duration::ZERO).unwrap();
        assert_eq!(ret, 0x64005);
    }

    #[test]
    fn no_retry_commands_use_the_exactly_once_trigger() {
        let mut regs = RegFile::new();
        submit(&mut regs, 0x41, &[0u8; 4], RetrySafety::NoRetry).unwrap();
        assert_eq!(regs.plain_cmd_writes, 0);
        assert_eq!(regs.once_cmd_writes, 1);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut regs = RegFile::new();
        let big = vec![0u8; MRPC_MAX_DATA_LEN + 1];
        assert!(matches!(
            submit(&mut regs, 0x41, &big, RetrySafety::Safe),
            Err(TransportError::OutOfRange { .. })
        ));
    }
}
