// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Network-tunneled management channel.
//!
//! A management service in front of the switch accepts length-prefixed
//! binary packets over TCP. Two connections are held per switch: one for
//! command traffic (MRPC and remote register access) and one that only ever
//! carries asynchronous event notifications, so that a blocking event wait
//! never races a command response.

use crate::Backend;
use crate::TransportError;
use pax_proto::mrpc::RetrySafety;
use pax_proto::net;
use pax_proto::net::PacketHeader;
use pax_proto::regs::GasAddress;
use std::io;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// A backend speaking to a switch management service over TCP.
pub struct TcpChannel {
    cmd: TcpStream,
    event: TcpStream,
}

impl TcpChannel {
    /// Connects both channels to the management service at `host:port`.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let cmd = open_channel(host, port, net::channel::COMMAND)?;
        let event = open_channel(host, port, net::channel::EVENT)?;
        Ok(TcpChannel { cmd, event })
    }

    fn send(&mut self, function_type: u8, body: &[u8], output_len: usize) -> io::Result<()> {
        let mut hdr = PacketHeader::new(net::packet_type::CMD, function_type);
        hdr.payload_len = (body.len() as u16).into();
        hdr.output_len = (output_len as u16).into();

        let mut packet = Vec::with_capacity(size_of::<PacketHeader>() + body.len());
        packet.extend_from_slice(hdr.as_bytes());
        packet.extend_from_slice(body);
        self.cmd.write_all(&packet)
    }

    fn recv(&mut self) -> Result<(PacketHeader, Vec<u8>), TransportError> {
        let (hdr, body) = recv_packet(&mut self.cmd)?;
        if hdr.packet_type == net::packet_type::OPEN
            && hdr.function_type == net::open_func::CLOSE
        {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "management service closed the channel",
            )));
        }
        Ok((hdr, body))
    }

    /// Runs one remote register access command and returns its output.
    fn reg_command(&mut self, body: &[u8], output_len: usize) -> Result<Vec<u8>, TransportError> {
        self.send(net::cmd_func::REG_CMD, body, output_len)?;
        let (_, reply) = self.recv()?;
        if reply.len() < 4 {
            return Err(TransportError::Malformed("register reply without a result"));
        }
        let mut result = [0u8; 4];
        result.copy_from_slice(&reply[..4]);
        if u32::from_le_bytes(result) != 0 {
            // The remote side could not reach the register space at all.
            return Err(TransportError::Unrecoverable);
        }
        Ok(reply[4..].to_vec())
    }

    fn reg_read(&mut self, addr: GasAddress, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut done = 0;
        while done < buf.len() {
            let len = (buf.len() - done).min(net::REMOTE_READ_MAX);
            let mut body = Vec::with_capacity(12);
            body.extend_from_slice(&net::remote_regs::READ.to_le_bytes());
            body.extend_from_slice(&(addr.0 + done as u32).to_le_bytes());
            body.extend_from_slice(&(len as u16).to_le_bytes());
            body.extend_from_slice(&[0; 2]);

            let data = self.reg_command(&body, len)?;
            if data.len() != len {
                return Err(TransportError::Malformed("short register read"));
            }
            buf[done..done + len].copy_from_slice(&data);
            done += len;
        }
        Ok(())
    }

    fn reg_write(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        let mut done = 0;
        while done < data.len() {
            let len = (data.len() - done).min(net::REMOTE_READ_MAX);
            let mut body = Vec::with_capacity(12 + len);
            body.extend_from_slice(&net::remote_regs::WRITE.to_le_bytes());
            body.extend_from_slice(&(addr.0 + done as u32).to_le_bytes());
            body.extend_from_slice(&(len as u16).to_le_bytes());
            body.extend_from_slice(&[0; 2]);
            body.extend_from_slice(&data[done..done + len]);

            self.reg_command(&body, 0)?;
            done += len;
        }
        Ok(())
    }
}

fn open_channel(host: &str, port: u16, role: u8) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;

    let mut hdr = PacketHeader::new(net::packet_type::OPEN, net::open_func::REQUEST);
    hdr.service_inst = role;
    stream.write_all(hdr.as_bytes())?;

    let (reply, _) = recv_packet(&mut stream).map_err(io::Error::other)?;
    if reply.packet_type != net::packet_type::OPEN
        || reply.function_type != net::open_func::ACCEPT
    {
        return Err(io::Error::other("management service rejected the channel"));
    }
    Ok(stream)
}

fn recv_packet(stream: &mut TcpStream) -> Result<(PacketHeader, Vec<u8>), TransportError> {
    let mut hdr_bytes = [0u8; size_of::<PacketHeader>()];
    stream.read_exact(&mut hdr_bytes)?;
    let hdr = PacketHeader::read_from_bytes(&hdr_bytes)
        .map_err(|_| TransportError::Malformed("truncated packet header"))?;
    if hdr.signature.get() != net::SIGNATURE {
        return Err(TransportError::Malformed("bad packet signature"));
    }

    let mut body = vec![0u8; hdr.payload_len.get() as usize];
    stream.read_exact(&mut body)?;
    Ok((hdr, body))
}

impl Backend for TcpChannel {
    fn submit(
        &mut self,
        cmd: u32,
        input: &[u8],
        resp_len: usize,
        _safety: RetrySafety,
    ) -> Result<(), TransportError> {
        let mut body = Vec::with_capacity(4 + input.len());
        body.extend_from_slice(&cmd.to_le_bytes());
        body.extend_from_slice(input);
        self.send(net::cmd_func::MRPC_CMD, &body, resp_len)?;
        Ok(())
    }

    fn collect(&mut self, output: &mut [u8]) -> Result<u32, TransportError> {
        let (_, body) = self.recv()?;
        if body.len() < 4 {
            return Err(TransportError::Malformed("response without a result code"));
        }

        let mut result = [0u8; 4];
        result.copy_from_slice(&body[..4]);
        let result = u32::from_le_bytes(result);
        if result != 0 {
            return Ok(result);
        }

        let data = &body[4..];
        if data.len() != output.len() {
            return Err(TransportError::Malformed("response length mismatch"));
        }
        output.copy_from_slice(data);
        Ok(0)
    }

    fn gas_read8(&mut self, addr: GasAddress) -> Result<u8, TransportError> {
        let mut buf = [0u8; 1];
        self.reg_read(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn gas_read16(&mut self, addr: GasAddress) -> Result<u16, TransportError> {
        let mut buf = [0u8; 2];
        self.reg_read(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn gas_read32(&mut self, addr: GasAddress) -> Result<u32, TransportError> {
        let mut buf = [0u8; 4];
        self.reg_read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn gas_read64(&mut self, addr: GasAddress) -> Result<u64, TransportError> {
        let mut buf = [0u8; 8];
        self.reg_read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn gas_write8(&mut self, addr: GasAddress, val: u8) -> Result<(), TransportError> {
        self.reg_write(addr, &[val])
    }

    fn gas_write16(&mut self, addr: GasAddress, val: u16) -> Result<(), TransportError> {
        self.reg_write(addr, &val.to_le_bytes())
    }

    fn gas_write32(&mut self, addr: GasAddress, val: u32) -> Result<(), TransportError> {
        self.reg_write(addr, &val.to_le_bytes())
    }

    fn gas_write64(&mut self, addr: GasAddress, val: u64) -> Result<(), TransportError> {
        self.reg_write(addr, &val.to_le_bytes())
    }

    fn gas_read_block(
        &mut self,
        addr: GasAddress,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        self.reg_read(addr, buf)
    }

    fn gas_write_block(&mut self, addr: GasAddress, data: &[u8]) -> Result<(), TransportError> {
        self.reg_write(addr, data)
    }

    fn event_wait(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        // A zero timeout still has to make one read attempt.
        let timeout = timeout.map(|d| d.max(Duration::from_millis(1)));
        self.event.set_read_timeout(timeout)?;

        let mut hdr_bytes = [0u8; size_of::<PacketHeader>()];
        match self.event.read_exact(&mut hdr_bytes) {
            Ok(()) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(false);
            }
            Err(err) => return Err(TransportError::Io(err)),
        }

        let hdr = PacketHeader::read_from_bytes(&hdr_bytes)
            .map_err(|_| TransportError::Malformed("truncated packet header"))?;
        let mut body = vec![0u8; hdr.payload_len.get() as usize];
        self.event.set_read_timeout(None)?;
        self.event.read_exact(&mut body)?;

        Ok(hdr.packet_type == net::packet_type::CMD
            && hdr.function_type == net::cmd_func::EVENT)
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        let hdr = PacketHeader::new(net::packet_type::OPEN, net::open_func::CLOSE);
        let _ = self.cmd.write_all(hdr.as_bytes());
    }
}
