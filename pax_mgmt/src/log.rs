// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Chip log retrieval.
//!
//! Logs are assembled chip-side and drained through the chunked dump
//! protocol, selected by a log id in the start phase. The payload is the
//! chip's packed log stream; decoding it takes the firmware's log
//! definition file and stays outside this library.

use crate::Switch;
use crate::error::Result;
use pax_proto::mrpc::CommandId;
use std::io::Write;

/// Which chip log to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogKind {
    /// The live RAM log.
    Ram = 0,
    /// The persistent flash log.
    Flash = 1,
    /// The memory transaction log.
    MemLog = 2,
    /// The register dump log.
    Regs = 3,
    /// Per-thread stack dumps.
    ThreadStack = 4,
    /// The system stack dump.
    SysStack = 5,
    /// The thread state log.
    Thread = 6,
}

impl Switch {
    /// Retrieves one chip log and writes it to `out`. Returns the number
    /// of bytes written.
    pub fn log_dump(&mut self, kind: LogKind, out: &mut impl Write) -> Result<u64> {
        let data = self.run_dump(CommandId::LOG_DUMP, kind as u32)?;
        out.write_all(&data)?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::LogKind;
    use crate::tests::open_sim;
    use pax_proto::mrpc::CommandId;

    #[test]
    fn log_streams_to_the_writer() {
        let (mut dev, ctl) = open_sim();
        let log: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        ctl.set_dump(CommandId::LOG_DUMP, log.clone());

        let mut sink = Vec::new();
        let written = dev.log_dump(LogKind::Ram, &mut sink).unwrap();
        assert_eq!(written, log.len() as u64);
        assert_eq!(sink, log);
    }
}
