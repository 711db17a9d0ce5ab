// src/bedrock/login.rs
//! The three game packets the proxy inspects: Login, ServerHandshake and
//! ResourcePackResponse. Everything else passes through as opaque blobs.
//!
//! Each blob starts with a varint gamepacket header whose low 10 bits are the
//! packet id; the remaining bits (sender/target sub-client ids) are preserved
//! verbatim across re-serialization.

use bytes::{Bytes, BytesMut};
use tourmaline_binary::{BinaryError, BinaryReader, BinaryWriter, Result};

pub const LOGIN_ID: u32 = 0x01;
pub const SERVER_HANDSHAKE_ID: u32 = 0x03;
pub const RESOURCE_PACK_RESPONSE_ID: u32 = 0x08;

/// Mask extracting the packet id from a gamepacket header.
const HEADER_ID_MASK: u32 = 0x3FF;

/// Reads the packet id from a blob without consuming it.
pub fn packet_id(payload: &Bytes) -> Result<u32> {
    let mut reader = payload.clone();
    Ok(reader.read_varu32()? & HEADER_ID_MASK)
}

/// Login (0x01): protocol version plus the connection request, which carries
/// the certificate chain and the client-data JWT.
#[derive(Debug, Clone)]
pub struct LoginPacket {
    /// Full gamepacket header, preserved for re-serialization.
    pub header: u32,
    pub protocol: i32,
    /// The certificate chain, in order; the last token's payload holds the
    /// client's `identityPublicKey`.
    pub tokens: Vec<String>,
    /// The client-data JWT (skin, locale, ...), signed by the same key.
    pub client: String,
}

impl LoginPacket {
    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        let header = read_header(reader, LOGIN_ID)?;
        let protocol = reader.read_i32_be()?;

        let mut request = reader.read_bytes_varint_len()?;
        let chain_len = request.read_u32_le()? as usize;
        let chain_json = request.read_bytes(chain_len)?;
        let chain: serde_json::Value = serde_json::from_slice(&chain_json)
            .map_err(|e| BinaryError::InvalidData(format!("Invalid login chain JSON: {}", e)))?;
        let tokens = chain
            .get("chain")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| BinaryError::InvalidData("Login chain missing 'chain' array".to_string()))?
            .iter()
            .map(|token| {
                token
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| BinaryError::InvalidData("Non-string chain entry".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        if tokens.is_empty() {
            return Err(BinaryError::InvalidData("Empty login chain".to_string()));
        }

        let client_len = request.read_u32_le()? as usize;
        let client = String::from_utf8(request.read_bytes(client_len)?.to_vec())?;

        Ok(Self { header, protocol, tokens, client })
    }

    pub fn encode(&self) -> Result<Bytes> {
        let chain_json = serde_json::to_vec(&serde_json::json!({ "chain": self.tokens }))
            .map_err(|e| BinaryError::InvalidData(format!("Chain serialization failed: {}", e)))?;

        let mut request = BytesMut::new();
        request.write_u32_le(chain_json.len() as u32)?;
        request.write_bytes(&chain_json)?;
        request.write_u32_le(self.client.len() as u32)?;
        request.write_bytes(self.client.as_bytes())?;

        let mut out = BytesMut::new();
        out.write_varu32(self.header)?;
        out.write_i32_be(self.protocol)?;
        out.write_bytes_varint_len(&request)?;
        Ok(out.freeze())
    }
}

/// ServerHandshake (0x03): a single JWT whose header names the server's
/// public key and whose payload carries the handshake salt.
#[derive(Debug, Clone)]
pub struct ServerHandshakePacket {
    pub header: u32,
    pub token: String,
}

impl ServerHandshakePacket {
    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        let header = read_header(reader, SERVER_HANDSHAKE_ID)?;
        let token = reader.read_string_varint_len()?;
        Ok(Self { header, token })
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        out.write_varu32(self.header)?;
        out.write_string_varint_len(&self.token)?;
        Ok(out.freeze())
    }
}

/// ResourcePackResponse (0x08): decoded for observation, never mutated.
#[derive(Debug, Clone)]
pub struct ResourcePackResponsePacket {
    pub header: u32,
    pub status: u8,
    pub pack_ids: Vec<String>,
}

impl ResourcePackResponsePacket {
    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        let header = read_header(reader, RESOURCE_PACK_RESPONSE_ID)?;
        let status = reader.read_u8()?;
        let count = reader.read_u16_le()?;
        let mut pack_ids = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            pack_ids.push(reader.read_string_varint_len()?);
        }
        Ok(Self { header, status, pack_ids })
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        out.write_varu32(self.header)?;
        out.write_u8(self.status)?;
        out.write_u16_le(self.pack_ids.len() as u16)?;
        for pack_id in &self.pack_ids {
            out.write_string_varint_len(pack_id)?;
        }
        Ok(out.freeze())
    }
}

fn read_header(reader: &mut Bytes, expected_id: u32) -> Result<u32> {
    let header = reader.read_varu32()?;
    let id = header & HEADER_ID_MASK;
    if id != expected_id {
        return Err(BinaryError::InvalidData(format!(
            "Unexpected gamepacket id {:#04x}, expected {:#04x}",
            id, expected_id
        )));
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_id_reads_low_bits() {
        let mut writer = BytesMut::new();
        // id 0x01 with sender sub-id bits set above the id mask
        writer.write_varu32(0x01 | (1 << 10)).unwrap();
        writer.write_u8(0xAA).unwrap();
        let payload = writer.freeze();
        assert_eq!(packet_id(&payload).unwrap(), LOGIN_ID);
        // Peeking does not consume.
        assert_eq!(payload.len(), 3);
    }

    #[test]
    fn test_login_round_trip() {
        let packet = LoginPacket {
            header: LOGIN_ID,
            protocol: 390,
            tokens: vec!["aaa.bbb.ccc".to_string(), "ddd.eee.fff".to_string()],
            client: "ggg.hhh.iii".to_string(),
        };

        let encoded = packet.encode().unwrap();
        let mut reader = encoded;
        let decoded = LoginPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.header, LOGIN_ID);
        assert_eq!(decoded.protocol, 390);
        assert_eq!(decoded.tokens, packet.tokens);
        assert_eq!(decoded.client, packet.client);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_login_token_replacement_survives_reencoding() {
        let mut packet = LoginPacket {
            header: LOGIN_ID,
            protocol: 390,
            tokens: vec!["first".to_string(), "original".to_string()],
            client: "client".to_string(),
        };

        *packet.tokens.last_mut().unwrap() = "replaced".to_string();
        let mut reader = packet.encode().unwrap();
        let decoded = LoginPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.tokens, vec!["first".to_string(), "replaced".to_string()]);
    }

    #[test]
    fn test_login_rejects_bad_chain() {
        // Valid framing, chain JSON without the expected array.
        let chain_json = br#"{"other": 1}"#;
        let mut request = BytesMut::new();
        request.write_u32_le(chain_json.len() as u32).unwrap();
        request.write_bytes(chain_json).unwrap();
        request.write_u32_le(0).unwrap();

        let mut out = BytesMut::new();
        out.write_varu32(LOGIN_ID).unwrap();
        out.write_i32_be(390).unwrap();
        out.write_bytes_varint_len(&request).unwrap();

        let mut reader = out.freeze();
        assert!(matches!(LoginPacket::decode(&mut reader), Err(BinaryError::InvalidData(_))));
    }

    #[test]
    fn test_handshake_round_trip() {
        let packet = ServerHandshakePacket {
            header: SERVER_HANDSHAKE_ID,
            token: "h.p.s".to_string(),
        };
        let mut reader = packet.encode().unwrap();
        let decoded = ServerHandshakePacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.token, "h.p.s");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_handshake_rejects_wrong_id() {
        let mut out = BytesMut::new();
        out.write_varu32(LOGIN_ID).unwrap();
        out.write_string_varint_len("h.p.s").unwrap();
        let mut reader = out.freeze();
        assert!(matches!(
            ServerHandshakePacket::decode(&mut reader),
            Err(BinaryError::InvalidData(_))
        ));
    }

    #[test]
    fn test_resource_pack_response_round_trip() {
        let packet = ResourcePackResponsePacket {
            header: RESOURCE_PACK_RESPONSE_ID,
            status: 3,
            pack_ids: vec!["pack-one".to_string(), "pack-two".to_string()],
        };
        let mut reader = packet.encode().unwrap();
        let decoded = ResourcePackResponsePacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.status, 3);
        assert_eq!(decoded.pack_ids, packet.pack_ids);
    }
}
