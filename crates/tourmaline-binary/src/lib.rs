//! # Tourmaline Binary Utilities
//!
//! Reader/writer extension traits over the `bytes` crate for the wire formats
//! the proxy speaks: RakNet headers (big-endian), sequence triads (24-bit
//! little-endian), and Bedrock varints with length-prefixed payloads.
//!
//! Every read checks the remaining length first; a short buffer surfaces as
//! [`BinaryError::UnexpectedEof`] instead of advancing the cursor.

use bytes::{Buf, BufMut, Bytes};
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

// --- Error Handling ---

/// Errors that can occur during binary operations.
#[derive(Error, Debug)]
pub enum BinaryError {
    /// Not enough bytes remaining in the buffer for the requested operation.
    #[error("Not enough bytes in buffer: needed {needed}, remaining {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// An underlying I/O error occurred (compression streams, mostly).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// VarInt or VarLong exceeded the maximum allowed bytes.
    #[error("VarInt/VarLong is too long (max bytes: {max_bytes})")]
    VarIntTooLong { max_bytes: usize },

    /// VarInt or VarLong encoding was not minimal or exceeds the target type.
    #[error("VarInt/VarLong value out of range for target type")]
    VarIntOutOfRange,

    /// Attempted to read a string that was not valid UTF-8.
    #[error("Invalid UTF-8 string data: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    /// An invalid value was encountered (bad packet id, bad flag byte, ...).
    #[error("Invalid data encountered: {0}")]
    InvalidData(String),
}

/// Result type alias for binary operations.
pub type Result<T> = std::result::Result<T, BinaryError>;

// --- Helper Macro for Reading ---

/// Checks if the buffer has enough remaining bytes and returns an error if not.
macro_rules! check_remaining {
    ($buf:expr, $len:expr) => {
        let needed = $len;
        let remaining = $buf.remaining();
        if remaining < needed {
            return Err(BinaryError::UnexpectedEof { needed, remaining });
        }
    };
}

// --- Reading Extension Trait ---

/// Extension trait for `bytes::Buf` providing methods to read protocol types.
pub trait BinaryReader: Buf {
    /// Reads a single `u8` byte.
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self, 1);
        Ok(self.get_u8())
    }

    /// Reads a single byte as a boolean (`0x00` is false, anything else is true).
    #[inline]
    fn read_bool(&mut self) -> Result<bool> {
        check_remaining!(self, 1);
        Ok(self.get_u8() != 0)
    }

    /// Reads a `u16` in big-endian format.
    #[inline]
    fn read_u16_be(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16())
    }

    /// Reads a `u16` in little-endian format.
    #[inline]
    fn read_u16_le(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16_le())
    }

    /// Reads a `u32` representing a little-endian 24-bit unsigned integer (triad).
    #[inline]
    fn read_u24_le(&mut self) -> Result<u32> {
        check_remaining!(self, 3);
        Ok(self.get_uint_le(3) as u32)
    }

    /// Reads a `u32` in big-endian format.
    #[inline]
    fn read_u32_be(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32())
    }

    /// Reads a `u32` in little-endian format.
    #[inline]
    fn read_u32_le(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32_le())
    }

    /// Reads an `i32` in big-endian format.
    #[inline]
    fn read_i32_be(&mut self) -> Result<i32> {
        check_remaining!(self, 4);
        Ok(self.get_i32())
    }

    /// Reads a `u64` in big-endian format.
    #[inline]
    fn read_u64_be(&mut self) -> Result<u64> {
        check_remaining!(self, 8);
        Ok(self.get_u64())
    }

    /// Reads an `i64` in big-endian format.
    #[inline]
    fn read_i64_be(&mut self) -> Result<i64> {
        check_remaining!(self, 8);
        Ok(self.get_i64())
    }

    /// Reads an unsigned 32-bit variable-length integer (VarInt).
    fn read_varu32(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        let mut shift: u32 = 0;
        const MAX_BYTES: usize = 5;

        for i in 0..MAX_BYTES {
            check_remaining!(self, 1);
            let byte = self.get_u8();

            value |= ((byte & 0x7F) as u32) << shift;

            if byte & 0x80 == 0 {
                // The 5th byte can only carry the top 4 bits of a u32.
                if i == MAX_BYTES - 1 && (byte >> 4) != 0 {
                    return Err(BinaryError::VarIntOutOfRange);
                }
                return Ok(value);
            }

            shift += 7;
        }

        Err(BinaryError::VarIntTooLong { max_bytes: MAX_BYTES })
    }

    /// Reads an unsigned 64-bit variable-length integer (VarLong).
    fn read_varu64(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        const MAX_BYTES: usize = 10;

        for i in 0..MAX_BYTES {
            check_remaining!(self, 1);
            let byte = self.get_u8();

            value |= ((byte & 0x7F) as u64) << shift;

            if byte & 0x80 == 0 {
                // The 10th byte can only carry the top bit of a u64.
                if i == MAX_BYTES - 1 && (byte >> 1) != 0 {
                    return Err(BinaryError::VarIntOutOfRange);
                }
                return Ok(value);
            }

            shift += 7;
        }

        Err(BinaryError::VarIntTooLong { max_bytes: MAX_BYTES })
    }

    /// Reads a byte slice prefixed with a `VarInt` length.
    fn read_bytes_varint_len(&mut self) -> Result<Bytes> {
        let len = self.read_varu32()? as usize;
        check_remaining!(self, len);
        Ok(self.copy_to_bytes(len))
    }

    /// Reads a UTF-8 string prefixed with a `VarInt` length.
    fn read_string_varint_len(&mut self) -> Result<String> {
        let bytes = self.read_bytes_varint_len()?;
        String::from_utf8(bytes.to_vec()).map_err(BinaryError::from)
    }

    /// Reads a byte slice with a fixed length.
    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        check_remaining!(self, len);
        Ok(self.copy_to_bytes(len))
    }

    /// Reads the remaining bytes in the buffer.
    fn read_remaining_bytes(&mut self) -> Bytes {
        self.copy_to_bytes(self.remaining())
    }
}

// Implement the trait for all types that implement `Buf`.
impl<T: Buf> BinaryReader for T {}

// --- Writing Extension Trait ---

/// Extension trait for `bytes::BufMut` providing methods to write protocol types.
pub trait BinaryWriter: BufMut {
    /// Writes a single `u8` byte.
    #[inline]
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put_u8(value);
        Ok(())
    }

    /// Writes a boolean as a single byte (`0x01` for true, `0x00` for false).
    #[inline]
    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.put_u8(if value { 1 } else { 0 });
        Ok(())
    }

    /// Writes a `u16` in big-endian format.
    #[inline]
    fn write_u16_be(&mut self, value: u16) -> Result<()> {
        self.put_u16(value);
        Ok(())
    }

    /// Writes a `u16` in little-endian format.
    #[inline]
    fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.put_u16_le(value);
        Ok(())
    }

    /// Writes a `u32` as a little-endian 24-bit unsigned integer (triad).
    /// Only the lower 3 bytes are written.
    #[inline]
    fn write_u24_le(&mut self, value: u32) -> Result<()> {
        self.put_uint_le((value & 0x00FF_FFFF) as u64, 3);
        Ok(())
    }

    /// Writes a `u32` in big-endian format.
    #[inline]
    fn write_u32_be(&mut self, value: u32) -> Result<()> {
        self.put_u32(value);
        Ok(())
    }

    /// Writes a `u32` in little-endian format.
    #[inline]
    fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.put_u32_le(value);
        Ok(())
    }

    /// Writes an `i32` in big-endian format.
    #[inline]
    fn write_i32_be(&mut self, value: i32) -> Result<()> {
        self.put_i32(value);
        Ok(())
    }

    /// Writes a `u64` in big-endian format.
    #[inline]
    fn write_u64_be(&mut self, value: u64) -> Result<()> {
        self.put_u64(value);
        Ok(())
    }

    /// Writes an `i64` in big-endian format.
    #[inline]
    fn write_i64_be(&mut self, value: i64) -> Result<()> {
        self.put_i64(value);
        Ok(())
    }

    /// Writes an unsigned 32-bit variable-length integer (VarInt).
    fn write_varu32(&mut self, mut value: u32) -> Result<()> {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.put_u8(byte);
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Writes an unsigned 64-bit variable-length integer (VarLong).
    fn write_varu64(&mut self, mut value: u64) -> Result<()> {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.put_u8(byte);
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Writes a byte slice prefixed with a `VarInt` length.
    fn write_bytes_varint_len(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            BinaryError::InvalidData("Byte slice length exceeds u32::MAX".to_string())
        })?;
        self.write_varu32(len)?;
        self.put_slice(bytes);
        Ok(())
    }

    /// Writes a UTF-8 string prefixed with a `VarInt` length.
    fn write_string_varint_len(&mut self, string: &str) -> Result<()> {
        self.write_bytes_varint_len(string.as_bytes())
    }

    /// Writes a raw byte slice (without length prefix).
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_slice(bytes);
        Ok(())
    }
}

// Implement the trait for all types that implement `BufMut`.
impl<T: BufMut> BinaryWriter for T {}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_u8_bool() {
        let mut writer = BytesMut::new();
        writer.write_u8(0xAB).unwrap();
        writer.write_bool(true).unwrap();
        writer.write_bool(false).unwrap();

        let mut reader = writer.freeze();
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
        assert!(matches!(
            reader.read_u8(),
            Err(BinaryError::UnexpectedEof { needed: 1, remaining: 0 })
        ));
    }

    #[test]
    fn test_endianness_u16_u32() {
        let mut writer = BytesMut::new();
        writer.write_u16_be(0xABCD).unwrap();
        writer.write_u16_le(0xABCD).unwrap();
        writer.write_u32_be(0xDEADBEEF).unwrap();
        writer.write_u32_le(0xDEADBEEF).unwrap();
        assert_eq!(
            writer.as_ref(),
            &[0xAB, 0xCD, 0xCD, 0xAB, 0xDE, 0xAD, 0xBE, 0xEF, 0xEF, 0xBE, 0xAD, 0xDE]
        );

        let mut reader = writer.freeze();
        assert_eq!(reader.read_u16_be().unwrap(), 0xABCD);
        assert_eq!(reader.read_u16_le().unwrap(), 0xABCD);
        assert_eq!(reader.read_u32_be().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u32_le().unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_triads() {
        let mut writer = BytesMut::new();
        writer.write_u24_le(0xABCDEF).unwrap(); // EF CD AB
        writer.write_u24_le(1).unwrap(); // 01 00 00
        assert_eq!(writer.as_ref(), &[0xEF, 0xCD, 0xAB, 0x01, 0x00, 0x00]);

        let mut reader = writer.freeze();
        assert_eq!(reader.read_u24_le().unwrap(), 0xABCDEF);
        assert_eq!(reader.read_u24_le().unwrap(), 1);
        assert!(matches!(
            reader.read_u24_le(),
            Err(BinaryError::UnexpectedEof { needed: 3, remaining: 0 })
        ));
    }

    #[test]
    fn test_i64_be() {
        let value: i64 = -123_456_789;
        let mut writer = BytesMut::new();
        writer.write_i64_be(value).unwrap();
        let mut reader = writer.freeze();
        assert_eq!(reader.read_i64_be().unwrap(), value);
    }

    #[test]
    fn test_varint_u32() {
        let values = [0u32, 1, 127, 128, 16383, 16384, 2097151, 2097152, u32::MAX];
        let expected_encodings: [&[u8]; 9] = [
            &[0x00],
            &[0x01],
            &[0x7f],
            &[0x80, 0x01],
            &[0xff, 0x7f],
            &[0x80, 0x80, 0x01],
            &[0xff, 0xff, 0x7f],
            &[0x80, 0x80, 0x80, 0x01],
            &[0xff, 0xff, 0xff, 0xff, 0x0f],
        ];

        for (i, &value) in values.iter().enumerate() {
            let mut writer = BytesMut::new();
            writer.write_varu32(value).unwrap();
            assert_eq!(writer.as_ref(), expected_encodings[i], "Encoding failed for {}", value);

            let mut reader = writer.freeze();
            assert_eq!(reader.read_varu32().unwrap(), value, "Decoding failed for {}", value);
            assert!(reader.is_empty(), "Reader not empty after decoding {}", value);
        }
    }

    #[test]
    fn test_varint_u64() {
        let values = [0u64, 1, 127, 128, u64::MAX];
        for &value in values.iter() {
            let mut writer = BytesMut::new();
            writer.write_varu64(value).unwrap();
            let mut reader = writer.freeze();
            assert_eq!(reader.read_varu64().unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_varint_errors() {
        // Too long (u32)
        let mut too_long_u32 = Bytes::from_static(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(
            too_long_u32.read_varu32(),
            Err(BinaryError::VarIntTooLong { max_bytes: 5 })
        ));

        // EOF mid-varint
        let mut eof_u32 = Bytes::from_static(&[0x80, 0x80]);
        assert!(matches!(eof_u32.read_varu32(), Err(BinaryError::UnexpectedEof { .. })));

        // Overlong encoding u32 (5th byte > 0x0F)
        let mut overlong_u32 = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0x1f]);
        assert!(matches!(overlong_u32.read_varu32(), Err(BinaryError::VarIntOutOfRange)));

        // Overlong encoding u64 (10th byte > 0x01)
        let mut overlong_u64 =
            Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02]);
        assert!(matches!(overlong_u64.read_varu64(), Err(BinaryError::VarIntOutOfRange)));
    }

    #[test]
    fn test_string_and_bytes() {
        let test_string = "Hello, Tourmaline!";
        let test_bytes = &[0xDE, 0xAD, 0xBE, 0xEF];

        let mut writer = BytesMut::new();
        writer.write_string_varint_len(test_string).unwrap();
        writer.write_bytes_varint_len(test_bytes).unwrap();
        writer.write_bytes(&[0xCA, 0xFE]).unwrap();

        let mut reader = writer.freeze();
        assert_eq!(reader.read_string_varint_len().unwrap(), test_string);
        assert_eq!(reader.read_bytes_varint_len().unwrap().as_ref(), test_bytes);
        assert_eq!(reader.read_bytes(2).unwrap().as_ref(), &[0xCA, 0xFE]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated_length_prefix() {
        // Declared length longer than the buffer.
        let mut reader = Bytes::from_static(&[0x05, 0x01, 0x02]);
        assert!(matches!(
            reader.read_bytes_varint_len(),
            Err(BinaryError::UnexpectedEof { needed: 5, remaining: 2 })
        ));
    }

    #[test]
    fn test_remaining_bytes() {
        let data = &[1, 2, 3, 4, 5];
        let mut reader = Bytes::from_static(data);

        assert_eq!(reader.read_u8().unwrap(), 1);
        let remaining = reader.read_remaining_bytes();
        assert_eq!(remaining.as_ref(), &[2, 3, 4, 5]);
        assert!(reader.is_empty());
    }
}
