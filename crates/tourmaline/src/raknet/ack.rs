// src/raknet/ack.rs
//! ACK/NACK packets.
//!
//! The proxy acknowledges every inbound datagram immediately with a single
//! record; it never aggregates. Decoding still accepts the full record grammar
//! (singles and ranges) since the endpoints batch their acknowledgements.

use super::datagram::{FLAG_ACK, FLAG_NACK, FLAG_VALID};
use bytes::{BufMut, Bytes, BytesMut};
use tourmaline_binary::{BinaryError, BinaryReader, BinaryWriter, Result};

pub const ACK_HEADER: u8 = FLAG_VALID | FLAG_ACK; // 0xC0
pub const NACK_HEADER: u8 = FLAG_VALID | FLAG_NACK; // 0xA0

/// Guard against ranges that would expand into absurd sequence lists.
const MAX_RANGE_SIZE: u32 = 512;

/// A single acknowledged sequence number or an inclusive range of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckNackRecord {
    Single(u32),
    Range(u32, u32),
}

/// An ACK (acknowledgement) or NACK (negative acknowledgement) packet.
#[derive(Debug, Clone)]
pub struct AckNack {
    /// `true` for NACK, `false` for ACK.
    pub is_nack: bool,
    pub records: Vec<AckNackRecord>,
}

impl AckNack {
    /// An ACK carrying exactly one sequence number, the shape the proxy emits
    /// for every datagram it receives.
    pub fn ack_single(sequence_number: u32) -> Self {
        Self {
            is_nack: false,
            records: vec![AckNackRecord::Single(sequence_number)],
        }
    }

    /// Decodes an ACK or NACK packet. The header byte has already been consumed.
    pub fn decode(reader: &mut Bytes, is_nack: bool) -> Result<Self> {
        let record_count = reader.read_u16_be()?;
        let mut records = Vec::with_capacity(record_count.min(64) as usize);

        for _ in 0..record_count {
            let record_type = reader.read_u8()?;
            match record_type {
                0 => {
                    let start = reader.read_u24_le()?;
                    let end = reader.read_u24_le()?;
                    if start > end {
                        return Err(BinaryError::InvalidData(format!(
                            "Invalid range record: start ({}) > end ({})",
                            start, end
                        )));
                    }
                    // Clamp range size for safety
                    let actual_end =
                        if end - start >= MAX_RANGE_SIZE { start + MAX_RANGE_SIZE - 1 } else { end };
                    records.push(AckNackRecord::Range(start, actual_end));
                }
                1 => {
                    let seq_num = reader.read_u24_le()?;
                    records.push(AckNackRecord::Single(seq_num));
                }
                _ => {
                    return Err(BinaryError::InvalidData(format!(
                        "Unknown ACK/NACK record type: {}",
                        record_type
                    )));
                }
            }
        }

        Ok(Self { is_nack, records })
    }

    /// Encodes the packet, header byte included.
    pub fn encode(&self, writer: &mut BytesMut) -> Result<()> {
        writer.put_u8(if self.is_nack { NACK_HEADER } else { ACK_HEADER });

        let record_count: u16 = self
            .records
            .len()
            .try_into()
            .map_err(|_| BinaryError::InvalidData("Too many ACK/NACK records".to_string()))?;
        writer.write_u16_be(record_count)?;

        for record in &self.records {
            match *record {
                AckNackRecord::Single(seq_num) => {
                    writer.put_u8(1);
                    writer.write_u24_le(seq_num)?;
                }
                AckNackRecord::Range(start, end) => {
                    writer.put_u8(0);
                    writer.write_u24_le(start)?;
                    writer.write_u24_le(end)?;
                }
            }
        }
        Ok(())
    }

    /// Expands all records into individual sequence numbers.
    pub fn sequence_numbers(&self) -> Vec<u32> {
        let mut seq_nums = Vec::new();
        for record in &self.records {
            match record {
                AckNackRecord::Single(n) => seq_nums.push(*n),
                AckNackRecord::Range(start, end) => seq_nums.extend(*start..=*end),
            }
        }
        seq_nums
    }
}
