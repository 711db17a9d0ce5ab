// src/raknet/datagram.rs
//! Structures related to RakNet datagrams and encapsulated packets.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tourmaline_binary::{BinaryError, BinaryReader, BinaryWriter, Result};

// --- Constants ---
pub const FLAG_VALID: u8 = 0x80;
pub const FLAG_ACK: u8 = 0x40;
pub const FLAG_NACK: u8 = 0x20;
/// Split flag inside an encapsulated packet's flags byte.
pub const FLAG_SPLIT: u8 = 0x10;

// --- Packet Structures ---

/// A RakNet datagram containing one or more [`EncapsulatedPacket`]s.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Combination of flags (FLAG_VALID, FLAG_ACK, FLAG_NACK).
    pub header_flags: u8,
    /// Sequence number for this datagram, stored as a LE triad on the wire.
    pub sequence_number: u32,
    /// The encapsulated packets carried within this datagram.
    pub packets: Vec<EncapsulatedPacket>,
}

impl Datagram {
    /// Creates a new, empty datagram with the valid flag set.
    pub fn new(sequence_number: u32) -> Self {
        Self {
            header_flags: FLAG_VALID,
            sequence_number,
            packets: Vec::new(),
        }
    }

    /// Decodes a datagram from a byte buffer.
    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        if reader.remaining() < 4 {
            // Min size: flags(1) + seq_num(3)
            return Err(BinaryError::UnexpectedEof { needed: 4, remaining: reader.remaining() });
        }
        let header_flags = reader.get_u8();
        if (header_flags & FLAG_VALID) == 0 {
            return Err(BinaryError::InvalidData("Datagram without VALID flag".into()));
        }

        let sequence_number = reader.read_u24_le()?;
        let mut packets = Vec::new();

        while reader.has_remaining() {
            packets.push(EncapsulatedPacket::decode(reader)?);
        }

        Ok(Self { header_flags, sequence_number, packets })
    }

    /// Encodes the datagram into a `BytesMut` buffer.
    pub fn encode(&self, writer: &mut BytesMut) -> Result<()> {
        writer.put_u8(self.header_flags);
        writer.write_u24_le(self.sequence_number)?;

        for packet in &self.packets {
            packet.encode(writer)?;
        }
        Ok(())
    }

    /// Encoded size of the datagram, headers included.
    pub fn calculate_size(&self) -> usize {
        let mut size = 1 + 3;
        for packet in &self.packets {
            size += packet.calculate_size();
        }
        size
    }
}

/// A single packet encapsulated within a RakNet datagram.
#[derive(Debug, Clone)]
pub struct EncapsulatedPacket {
    pub reliability: Reliability,
    pub is_split: bool,
    /// Reliable message number (only for reliable variants), LE triad.
    pub message_index: Option<u32>,
    /// Sequence number (only for sequenced variants), LE triad.
    pub sequence_index: Option<u32>,
    /// Ordering index (only for ordered/sequenced variants), LE triad.
    pub order_index: Option<u32>,
    /// Ordering channel (only for ordered/sequenced variants).
    pub order_channel: Option<u8>,
    /// Number of fragments the original packet was split into, u32 BE.
    pub split_count: Option<u32>,
    /// ID shared among all fragments of the same split packet, u16 BE.
    pub split_id: Option<u16>,
    /// Index of this fragment (0-based), u32 BE.
    pub split_index: Option<u32>,
    /// The actual payload.
    pub buffer: Bytes,
}

impl EncapsulatedPacket {
    /// Decodes an encapsulated packet from a buffer.
    pub fn decode(reader: &mut Bytes) -> Result<Self> {
        if reader.remaining() < 3 {
            // flags (1) + length (2)
            return Err(BinaryError::UnexpectedEof { needed: 3, remaining: reader.remaining() });
        }
        let flags = reader.get_u8();
        let reliability = Reliability::from_u8((flags >> 5) & 0x07)
            .ok_or_else(|| BinaryError::InvalidData(format!("Invalid reliability in flags {:#04x}", flags)))?;
        let is_split = (flags & FLAG_SPLIT) != 0;

        let length_bits = reader.read_u16_be()?;
        let length_bytes = (length_bits as usize).div_ceil(8);

        let mut message_index = None;
        let mut sequence_index = None;
        let mut order_index = None;
        let mut order_channel = None;

        if reliability.is_reliable() {
            message_index = Some(reader.read_u24_le()?);
        }
        if reliability.is_sequenced() {
            sequence_index = Some(reader.read_u24_le()?);
        }
        if reliability.needs_ordering_info() {
            order_index = Some(reader.read_u24_le()?);
            order_channel = Some(reader.read_u8()?);
        }

        let mut split_count = None;
        let mut split_id = None;
        let mut split_index = None;

        if is_split {
            split_count = Some(reader.read_u32_be()?);
            split_id = Some(reader.read_u16_be()?);
            split_index = Some(reader.read_u32_be()?);
        }

        let buffer = reader.read_bytes(length_bytes)?;

        Ok(Self {
            reliability,
            is_split,
            message_index,
            sequence_index,
            order_index,
            order_channel,
            split_count,
            split_id,
            split_index,
            buffer,
        })
    }

    /// Encodes the encapsulated packet into a buffer.
    pub fn encode(&self, writer: &mut BytesMut) -> Result<()> {
        let mut flags = (self.reliability as u8) << 5;
        if self.is_split {
            flags |= FLAG_SPLIT;
        }
        writer.put_u8(flags);

        let length_bits = self.buffer.len() * 8;
        if length_bits > u16::MAX as usize {
            return Err(BinaryError::InvalidData(format!(
                "Encapsulated packet buffer too large: {} bytes",
                self.buffer.len()
            )));
        }
        writer.write_u16_be(length_bits as u16)?;

        if self.reliability.is_reliable() {
            writer.write_u24_le(self.message_index.ok_or_else(|| {
                BinaryError::InvalidData("Missing message_index for reliable packet".to_string())
            })?)?;
        }

        if self.reliability.is_sequenced() {
            writer.write_u24_le(self.sequence_index.ok_or_else(|| {
                BinaryError::InvalidData("Missing sequence_index for sequenced packet".to_string())
            })?)?;
        }

        if self.reliability.needs_ordering_info() {
            writer.write_u24_le(self.order_index.ok_or_else(|| {
                BinaryError::InvalidData("Missing order_index for ordered packet".to_string())
            })?)?;
            writer.write_u8(self.order_channel.unwrap_or(0))?;
        }

        if self.is_split {
            writer.write_u32_be(self.split_count.ok_or_else(|| {
                BinaryError::InvalidData("Missing split_count for split packet".to_string())
            })?)?;
            writer.write_u16_be(self.split_id.ok_or_else(|| {
                BinaryError::InvalidData("Missing split_id for split packet".to_string())
            })?)?;
            writer.write_u32_be(self.split_index.ok_or_else(|| {
                BinaryError::InvalidData("Missing split_index for split packet".to_string())
            })?)?;
        }

        writer.put(self.buffer.clone());

        Ok(())
    }

    /// Header size based on reliability and split status.
    pub fn header_size(&self) -> usize {
        let mut size = 1 + 2; // flags (1) + length (2)
        if self.reliability.is_reliable() {
            size += 3;
        }
        if self.reliability.is_sequenced() {
            size += 3;
        }
        if self.reliability.needs_ordering_info() {
            size += 3 + 1;
        }
        if self.is_split {
            size += 4 + 2 + 4;
        }
        size
    }

    /// Total encoded size (header + buffer).
    pub fn calculate_size(&self) -> usize {
        self.header_size() + self.buffer.len()
    }
}

/// RakNet packet reliability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Reliability {
    #[default]
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl Reliability {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Reliability::Unreliable),
            1 => Some(Reliability::UnreliableSequenced),
            2 => Some(Reliability::Reliable),
            3 => Some(Reliability::ReliableOrdered),
            4 => Some(Reliability::ReliableSequenced),
            5 => Some(Reliability::UnreliableWithAckReceipt),
            6 => Some(Reliability::ReliableWithAckReceipt),
            7 => Some(Reliability::ReliableOrderedWithAckReceipt),
            _ => None,
        }
    }

    /// Returns `true` if the reliability type requires a message index.
    #[inline]
    pub const fn is_reliable(self) -> bool {
        matches!(
            self,
            Reliability::Reliable
                | Reliability::ReliableOrdered
                | Reliability::ReliableSequenced
                | Reliability::ReliableWithAckReceipt
                | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Returns `true` if the reliability type uses ordering.
    #[inline]
    pub const fn is_ordered(self) -> bool {
        matches!(
            self,
            Reliability::ReliableOrdered | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Returns `true` if the reliability type uses sequencing.
    #[inline]
    pub const fn is_sequenced(self) -> bool {
        matches!(
            self,
            Reliability::UnreliableSequenced | Reliability::ReliableSequenced
        )
    }

    /// Returns `true` if the packet carries an ordering channel and index.
    #[inline]
    pub const fn needs_ordering_info(self) -> bool {
        self.is_ordered() || self.is_sequenced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn simple(buffer: Bytes, message_index: Option<u32>, order_index: Option<u32>) -> EncapsulatedPacket {
        EncapsulatedPacket {
            reliability: Reliability::ReliableOrdered,
            is_split: false,
            message_index,
            sequence_index: None,
            order_index,
            order_channel: Some(0),
            split_count: None,
            split_id: None,
            split_index: None,
            buffer,
        }
    }

    #[test]
    fn test_encode_decode_simple_encapsulated() {
        let payload = Bytes::from_static(&[0xFE, 0x01, 0x02, 0x03]);
        let packet = simple(payload.clone(), Some(10), Some(5));

        let mut writer = BytesMut::new();
        packet.encode(&mut writer).unwrap();

        let expected = Bytes::from_static(&[
            0x60, // Flags (reliability 3 << 5)
            0x00, 0x20, // Length (32 bits = 4 bytes) BE
            0x0A, 0x00, 0x00, // Message Index (10) LE Triad
            0x05, 0x00, 0x00, // Order Index (5) LE Triad
            0x00, // Order Channel (0)
            0xFE, 0x01, 0x02, 0x03, // Payload
        ]);

        assert_eq!(writer.freeze(), expected);

        let mut reader_bytes = expected;
        let decoded = EncapsulatedPacket::decode(&mut reader_bytes).unwrap();

        assert_eq!(decoded.reliability, Reliability::ReliableOrdered);
        assert!(!decoded.is_split);
        assert_eq!(decoded.message_index, Some(10));
        assert_eq!(decoded.order_index, Some(5));
        assert_eq!(decoded.order_channel, Some(0));
        assert_eq!(decoded.buffer, payload);
        assert!(reader_bytes.is_empty());
    }

    #[test]
    fn test_encode_decode_split_encapsulated() {
        let payload = Bytes::from_static(&[0xAA, 0xBB, 0xCC]);
        let packet = EncapsulatedPacket {
            reliability: Reliability::Reliable,
            is_split: true,
            message_index: Some(20),
            sequence_index: None,
            order_index: None,
            order_channel: None,
            split_count: Some(2),
            split_id: Some(1234),
            split_index: Some(0),
            buffer: payload.clone(),
        };

        let mut writer = BytesMut::new();
        packet.encode(&mut writer).unwrap();

        let expected = Bytes::from_static(&[
            0x50, // Flags (reliability 2 << 5 | split 0x10)
            0x00, 0x18, // Length (24 bits = 3 bytes) BE
            0x14, 0x00, 0x00, // Message Index (20) LE Triad
            0x00, 0x00, 0x00, 0x02, // Split Count (2) BE u32
            0x04, 0xD2, // Split ID (1234) BE u16
            0x00, 0x00, 0x00, 0x00, // Split Index (0) BE u32
            0xAA, 0xBB, 0xCC, // Payload
        ]);

        assert_eq!(writer.freeze(), expected);

        let mut reader_bytes = expected;
        let decoded = EncapsulatedPacket::decode(&mut reader_bytes).unwrap();

        assert_eq!(decoded.reliability, Reliability::Reliable);
        assert!(decoded.is_split);
        assert_eq!(decoded.message_index, Some(20));
        assert_eq!(decoded.split_count, Some(2));
        assert_eq!(decoded.split_id, Some(1234));
        assert_eq!(decoded.split_index, Some(0));
        assert_eq!(decoded.buffer, payload);
        assert!(reader_bytes.is_empty());
    }

    #[test]
    fn test_zero_length_payload_round_trip() {
        // Trailing fragments of exactly-divisible splits are empty.
        let packet = EncapsulatedPacket {
            reliability: Reliability::Reliable,
            is_split: true,
            message_index: Some(3),
            sequence_index: None,
            order_index: None,
            order_channel: None,
            split_count: Some(2),
            split_id: Some(7),
            split_index: Some(1),
            buffer: Bytes::new(),
        };

        let mut writer = BytesMut::new();
        packet.encode(&mut writer).unwrap();
        let mut reader = writer.freeze();
        let decoded = EncapsulatedPacket::decode(&mut reader).unwrap();
        assert!(decoded.buffer.is_empty());
        assert_eq!(decoded.split_index, Some(1));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_encapsulated_header_size() {
        let p1 = simple(Bytes::new(), Some(1), Some(1)); // ReliableOrdered
        assert_eq!(p1.header_size(), 1 + 2 + 3 + 3 + 1);

        let p2 = EncapsulatedPacket { reliability: Reliability::Unreliable, ..p1.clone() };
        assert_eq!(p2.header_size(), 1 + 2);

        let p3 = EncapsulatedPacket {
            reliability: Reliability::Reliable,
            is_split: true,
            message_index: Some(1),
            split_count: Some(1),
            split_id: Some(1),
            split_index: Some(1),
            ..p1.clone()
        };
        assert_eq!(p3.header_size(), 1 + 2 + 3 + 10);

        let p4 = EncapsulatedPacket {
            reliability: Reliability::UnreliableSequenced,
            sequence_index: Some(1),
            order_index: Some(1),
            order_channel: Some(0),
            ..p1
        };
        assert_eq!(p4.header_size(), 1 + 2 + 3 + 3 + 1);
    }

    #[test]
    fn test_decode_datagram() {
        let payload1 = Bytes::from_static(&[0xFE, 0x01, 0x02]);
        let payload2 = Bytes::from_static(&[0xFE, 0xAA]);
        let mut enc1_writer = BytesMut::new();
        EncapsulatedPacket {
            reliability: Reliability::Unreliable,
            is_split: false,
            buffer: payload1.clone(),
            message_index: None,
            sequence_index: None,
            order_index: None,
            order_channel: None,
            split_count: None,
            split_id: None,
            split_index: None,
        }
        .encode(&mut enc1_writer)
        .unwrap();
        let mut enc2_writer = BytesMut::new();
        simple(payload2.clone(), Some(5), Some(10)).encode(&mut enc2_writer).unwrap();

        let mut writer = BytesMut::new();
        writer.put_u8(FLAG_VALID);
        writer.write_u24_le(12345).unwrap();
        writer.put(enc1_writer.freeze());
        writer.put(enc2_writer.freeze());

        let mut reader_bytes = writer.freeze();
        let datagram = Datagram::decode(&mut reader_bytes).unwrap();

        assert_eq!(datagram.header_flags, FLAG_VALID);
        assert_eq!(datagram.sequence_number, 12345);
        assert_eq!(datagram.packets.len(), 2);

        assert_eq!(datagram.packets[0].reliability, Reliability::Unreliable);
        assert_eq!(datagram.packets[0].buffer, payload1);

        assert_eq!(datagram.packets[1].reliability, Reliability::ReliableOrdered);
        assert_eq!(datagram.packets[1].message_index, Some(5));
        assert_eq!(datagram.packets[1].order_index, Some(10));
        assert_eq!(datagram.packets[1].buffer, payload2);

        assert!(reader_bytes.is_empty());
    }

    #[test]
    fn test_datagram_round_trip() {
        let mut datagram = Datagram::new(77);
        datagram.packets.push(simple(Bytes::from_static(&[0xFE, 0x00]), Some(0), Some(0)));

        let mut writer = BytesMut::new();
        datagram.encode(&mut writer).unwrap();
        let encoded = writer.freeze();
        assert_eq!(encoded.len(), datagram.calculate_size());

        let mut reader = encoded;
        let decoded = Datagram::decode(&mut reader).unwrap();
        assert_eq!(decoded.sequence_number, 77);
        assert_eq!(decoded.packets.len(), 1);
        assert_eq!(decoded.packets[0].buffer, datagram.packets[0].buffer);
    }

    #[test]
    fn test_decode_datagram_eof() {
        let mut reader_bytes = Bytes::from_static(&[FLAG_VALID, 0x01, 0x00]); // Too short for sequence number
        let result = Datagram::decode(&mut reader_bytes);
        assert!(matches!(result, Err(BinaryError::UnexpectedEof { needed: 4, .. })));

        let mut writer = BytesMut::new();
        writer.put_u8(FLAG_VALID);
        writer.write_u24_le(1).unwrap();
        writer.put_u8(0x00); // Reliability=0, no split
        writer.write_u16_be(8 * 5).unwrap(); // length 5 bytes
        writer.put(&[0x01, 0x02, 0x03][..]); // Only 3 bytes of payload
        let mut reader_payload_eof = writer.freeze();
        let result_payload = Datagram::decode(&mut reader_payload_eof);
        assert!(matches!(result_payload, Err(BinaryError::UnexpectedEof { needed: 5, .. })));
    }

    #[test]
    fn test_decode_invalid_header() {
        let mut reader = Bytes::from_static(&[0x00, 0x01, 0x00, 0x00]); // VALID flag missing
        assert!(matches!(Datagram::decode(&mut reader), Err(BinaryError::InvalidData(_))));
    }
}
