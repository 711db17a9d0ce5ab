// src/bedrock/batch.rs
//! The batch container (0xFE) and its per-direction encrypted rendition.
//!
//! A batch body is a zlib stream; inflated, it is a concatenation of
//! varint-length-prefixed game packet blobs. In the Encrypted session state
//! the body is additionally wrapped by the direction's cipher: CFB8 on the
//! way in, GCM (ciphertext || tag) on the way out. The asymmetry mirrors the
//! transitional protocol generation this proxy targets.

use crate::crypto::{self, SharedSecret};
use crate::error::Result;
use bytes::{Buf, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tourmaline_binary::{BinaryError, BinaryReader, BinaryWriter};

/// Wire id of the batch container.
pub const BATCH_ID: u8 = 0xFE;

/// A decoded batch: the inner game packet blobs, in order.
#[derive(Debug, Clone, Default)]
pub struct BatchPacket {
    pub packets: Vec<Bytes>,
}

impl BatchPacket {
    pub fn new(packets: Vec<Bytes>) -> Self {
        Self { packets }
    }

    /// Decodes an unencrypted batch, id byte included.
    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        check_id(reader)?;
        let body = reader.read_remaining_bytes();
        Self::from_body(&body)
    }

    /// Encodes an unencrypted batch, id byte included.
    pub fn encode(&self) -> Result<Bytes> {
        let body = self.to_body()?;
        let mut out = BytesMut::with_capacity(1 + body.len());
        out.write_u8(BATCH_ID)?;
        out.write_bytes(&body)?;
        Ok(out.freeze())
    }

    /// Inflates a batch body and splits the inner records.
    pub(crate) fn from_body(body: &[u8]) -> Result<Self> {
        let mut decoder = ZlibDecoder::new(body);
        let mut inflated = Vec::new();
        decoder.read_to_end(&mut inflated).map_err(BinaryError::Io)?;

        let mut reader = Bytes::from(inflated);
        let mut packets = Vec::new();
        while reader.has_remaining() {
            packets.push(reader.read_bytes_varint_len()?);
        }
        Ok(Self { packets })
    }

    /// Concatenates the inner records and deflates the result.
    pub(crate) fn to_body(&self) -> Result<Vec<u8>> {
        let mut plain = BytesMut::new();
        for packet in &self.packets {
            plain.write_bytes_varint_len(packet)?;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).map_err(BinaryError::Io)?;
        Ok(encoder.finish().map_err(BinaryError::Io)?)
    }
}

/// Direction-specific encrypted batch codec, installed at the corresponding
/// handshake step. `decode` handles traffic arriving *from* the peer this
/// codec's secret is shared with; `encode` produces traffic headed *to* it.
#[derive(Debug, Clone)]
pub struct BatchCodec {
    secret: SharedSecret,
}

impl BatchCodec {
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    /// Decrypts (AES-256-CFB8) and inflates a batch, id byte included.
    pub fn decode(&self, reader: &mut Bytes) -> Result<BatchPacket> {
        check_id(reader)?;
        let ciphertext = reader.read_remaining_bytes();
        let body = crypto::decrypt_cfb8(&self.secret, &ciphertext)?;
        BatchPacket::from_body(&body)
    }

    /// Deflates and encrypts (AES-256-GCM, ciphertext || tag), id byte included.
    pub fn encode(&self, batch: &BatchPacket) -> Result<Bytes> {
        let body = batch.to_body()?;
        let ciphertext = crypto::encrypt_gcm(&self.secret, &body)?;
        let mut out = BytesMut::with_capacity(1 + ciphertext.len());
        out.write_u8(BATCH_ID)?;
        out.write_bytes(&ciphertext)?;
        Ok(out.freeze())
    }
}

fn check_id(reader: &mut Bytes) -> Result<()> {
    let id = reader.read_u8()?;
    if id != BATCH_ID {
        return Err(BinaryError::InvalidData(format!(
            "Expected batch id {:#04x}, got {:#04x}",
            BATCH_ID, id
        ))
        .into());
    }
    Ok(())
}
