// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fabric topology, database, and binding operations.
//!
//! Topology and database dumps arrive through the chunked dump protocol
//! and are returned as the raw payload the chip assembled; their inner
//! layout varies by chip generation and is decoded by tooling above this
//! library. Binding glues an endpoint function to a (partition, logical
//! port) pair.

use crate::Switch;
use crate::error::Result;
use pax_proto::mrpc::CommandId;
use pax_proto::mrpc::bind;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Binding state of one physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    /// Physical port.
    pub phys_port_id: u8,
    /// Partition the port is bound into.
    pub partition: u8,
    /// Logical port within the partition.
    pub log_port_id: u8,
    /// Raw binding state as the chip reports it.
    pub state: u8,
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
struct BindStatusRequest {
    sub_cmd: u8,
    phys_port_id: u8,
    reserved: [u8; 2],
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Clone, Copy)]
struct BindStatusEntry {
    phys_port_id: u8,
    par_id: u8,
    log_port_id: u8,
    bind_state: u8,
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
struct BindStatusReply {
    inf_cnt: u8,
    reserved: [u8; 3],
    port_info: [BindStatusEntry; 48],
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
struct BindRequest {
    sub_cmd: u8,
    par_id: u8,
    log_port_id: u8,
    phys_port_id: u8,
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
struct UnbindRequest {
    sub_cmd: u8,
    par_id: u8,
    log_port_id: u8,
    opt: u8,
}

/// Unbind option: complete outstanding I/O before releasing the port.
const UNBIND_OPT_DRAIN: u8 = 2;

impl Switch {
    /// Dumps the fabric topology the attached switch knows about. The
    /// payload layout is generation specific and left to the caller.
    pub fn topo_info_dump(&mut self) -> Result<Vec<u8>> {
        self.run_dump(CommandId::TOPO_INFO_DUMP, 0)
    }

    /// Dumps a section of the fabric management database. `section` selects
    /// the chip-defined report.
    pub fn gfms_db_dump(&mut self, section: u32) -> Result<Vec<u8>> {
        self.run_dump(CommandId::GFMS_DB_DUMP, section)
    }

    /// Queries the binding state of `phys_port`.
    pub fn bind_info(&mut self, phys_port: u8) -> Result<Vec<PortBinding>> {
        let request = BindStatusRequest {
            sub_cmd: bind::INFO,
            phys_port_id: phys_port,
            reserved: [0; 2],
        };
        let reply: BindStatusReply =
            self.command_reply(CommandId::PORT_PART_P2P, request.as_bytes())?;

        let count = (reply.inf_cnt as usize).min(reply.port_info.len());
        Ok(reply.port_info[..count]
            .iter()
            .map(|entry| PortBinding {
                phys_port_id: entry.phys_port_id,
                partition: entry.par_id,
                log_port_id: entry.log_port_id,
                state: entry.bind_state,
            })
            .collect())
    }

    /// Binds physical port `phys_port` to `logical_port` of `partition`.
    pub fn bind(&mut self, partition: u8, logical_port: u8, phys_port: u8) -> Result<()> {
        let request = BindRequest {
            sub_cmd: bind::BIND,
            par_id: partition,
            log_port_id: logical_port,
            phys_port_id: phys_port,
        };
        let mut out = [0u8; 4];
        self.command(CommandId::PORT_PART_P2P, request.as_bytes(), &mut out)
    }

    /// Unbinds `logical_port` from `partition`, draining outstanding I/O
    /// first.
    pub fn unbind(&mut self, partition: u8, logical_port: u8) -> Result<()> {
        let request = UnbindRequest {
            sub_cmd: bind::UNBIND,
            par_id: partition,
            log_port_id: logical_port,
            opt: UNBIND_OPT_DRAIN,
        };
        let mut out = [0u8; 4];
        self.command(CommandId::PORT_PART_P2P, request.as_bytes(), &mut out)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::open_sim;
    use pax_proto::mrpc::CommandId;

    #[test]
    fn dumps_return_the_assembled_payload() {
        let (mut dev, ctl) = open_sim();
        let topo: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
        ctl.set_dump(CommandId::TOPO_INFO_DUMP, topo.clone());
        assert_eq!(dev.topo_info_dump().unwrap(), topo);

        let db: Vec<u8> = vec![0xab; 4096];
        ctl.set_dump(CommandId::GFMS_DB_DUMP, db.clone());
        assert_eq!(dev.gfms_db_dump(1).unwrap(), db);
    }

    #[test]
    fn bind_and_unbind_round_trip() {
        let (mut dev, _ctl) = open_sim();
        dev.bind(0, 1, 8).unwrap();
        dev.unbind(0, 1).unwrap();
        let bindings = dev.bind_info(8).unwrap();
        assert!(bindings.is_empty());
    }
}
