// src/raknet/offline.rs
//! Offline-phase connection openers.
//!
//! The proxy forwards offline traffic verbatim; these two packets are the only
//! ones it actually parses, to observe the negotiated MTU and to catch the
//! server's reply that moves the session online.

use super::{OFFLINE_MESSAGE_DATA_ID, OPEN_CONNECTION_REPLY_2, OPEN_CONNECTION_REQUEST_2};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tourmaline_binary::{BinaryError, BinaryReader, BinaryWriter, Result};

/// Minimum MTU RakNet peers will negotiate down to.
pub const MIN_MTU_SIZE: u16 = 400;

/// Open Connection Request 2 (0x07): the client's final MTU proposal.
#[derive(Debug, Clone)]
pub struct OpenConnectionRequest2 {
    // Magic is implicit
    pub server_address: std::net::SocketAddr,
    pub mtu_size: u16,    // u16 MTU BE
    pub client_guid: i64, // i64 GUID BE
}

impl OpenConnectionRequest2 {
    pub const ID: u8 = OPEN_CONNECTION_REQUEST_2;

    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        read_id_and_magic(reader, Self::ID)?;
        let server_address = read_address(reader)?;
        let mtu_size = reader.read_u16_be()?;
        let client_guid = reader.read_i64_be()?;
        Ok(Self { server_address, mtu_size, client_guid })
    }

    pub fn encode(&self, writer: &mut BytesMut) -> Result<()> {
        writer.write_u8(Self::ID)?;
        writer.write_bytes(&OFFLINE_MESSAGE_DATA_ID)?;
        write_address(writer, &self.server_address)?;
        writer.write_u16_be(self.mtu_size)?;
        writer.write_i64_be(self.client_guid)?;
        Ok(())
    }
}

/// Open Connection Reply 2 (0x08): the server's MTU acknowledgement. Seeing
/// one pass through means both peers are about to go online.
#[derive(Debug, Clone)]
pub struct OpenConnectionReply2 {
    // Magic is implicit
    pub server_guid: i64,                     // i64 GUID BE
    pub client_address: std::net::SocketAddr, // Client's perceived address
    pub mtu_size: u16,                        // u16 MTU BE
    pub use_encryption: bool,
}

impl OpenConnectionReply2 {
    pub const ID: u8 = OPEN_CONNECTION_REPLY_2;

    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        read_id_and_magic(reader, Self::ID)?;
        let server_guid = reader.read_i64_be()?;
        let client_address = read_address(reader)?;
        let mtu_size = reader.read_u16_be()?;
        let use_encryption = reader.read_bool()?;
        Ok(Self { server_guid, client_address, mtu_size, use_encryption })
    }

    pub fn encode(&self, writer: &mut BytesMut) -> Result<()> {
        writer.write_u8(Self::ID)?;
        writer.write_bytes(&OFFLINE_MESSAGE_DATA_ID)?;
        writer.write_i64_be(self.server_guid)?;
        write_address(writer, &self.client_address)?;
        writer.write_u16_be(self.mtu_size)?;
        writer.write_bool(self.use_encryption)?;
        Ok(())
    }
}

fn read_id_and_magic(reader: &mut Bytes, expected_id: u8) -> Result<()> {
    let id = reader.read_u8()?;
    if id != expected_id {
        return Err(BinaryError::InvalidData(format!(
            "Unexpected packet id {:#04x}, expected {:#04x}",
            id, expected_id
        )));
    }
    let magic = reader.read_bytes(16)?;
    if magic.as_ref() != OFFLINE_MESSAGE_DATA_ID.as_slice() {
        return Err(BinaryError::InvalidData("Invalid offline message magic".to_string()));
    }
    Ok(())
}

// --- Address helpers ---

/// Writes a `SocketAddr` (IPv4 or IPv6) in RakNet format.
pub fn write_address(writer: &mut BytesMut, addr: &std::net::SocketAddr) -> Result<()> {
    match addr {
        std::net::SocketAddr::V4(v4_addr) => {
            writer.put_u8(4);
            // IPv4 octets go out inverted
            for byte in v4_addr.ip().octets().iter() {
                writer.put_u8(!byte);
            }
            writer.write_u16_be(v4_addr.port())?;
        }
        std::net::SocketAddr::V6(v6_addr) => {
            writer.put_u8(6);
            writer.write_u16_le(23)?; // AF_INET6, LE as observed on the wire
            writer.write_u16_be(v6_addr.port())?;
            writer.write_u32_be(v6_addr.flowinfo())?;
            writer.put(&v6_addr.ip().octets()[..]);
            writer.write_u32_be(v6_addr.scope_id())?;
        }
    }
    Ok(())
}

/// Reads a `SocketAddr` (IPv4 or IPv6) in RakNet format.
pub fn read_address(reader: &mut Bytes) -> Result<std::net::SocketAddr> {
    let addr_type = reader.read_u8()?;
    match addr_type {
        4 => {
            if reader.remaining() < 4 + 2 {
                return Err(BinaryError::UnexpectedEof { needed: 6, remaining: reader.remaining() });
            }
            let mut ip_bytes = [0u8; 4];
            reader.copy_to_slice(&mut ip_bytes);
            for byte in ip_bytes.iter_mut() {
                *byte = !*byte;
            }
            let ip = std::net::Ipv4Addr::from(ip_bytes);
            let port = reader.read_u16_be()?;
            Ok(std::net::SocketAddr::V4(std::net::SocketAddrV4::new(ip, port)))
        }
        6 => {
            if reader.remaining() < 2 + 2 + 4 + 16 + 4 {
                return Err(BinaryError::UnexpectedEof { needed: 28, remaining: reader.remaining() });
            }
            let _family = reader.read_u16_le()?;
            let port = reader.read_u16_be()?;
            let flowinfo = reader.read_u32_be()?;
            let mut ip_bytes = [0u8; 16];
            reader.copy_to_slice(&mut ip_bytes);
            let ip = std::net::Ipv6Addr::from(ip_bytes);
            let scope_id = reader.read_u32_be()?;
            Ok(std::net::SocketAddr::V6(std::net::SocketAddrV6::new(ip, port, flowinfo, scope_id)))
        }
        _ => Err(BinaryError::InvalidData(format!("Unknown address type: {}", addr_type))),
    }
}
