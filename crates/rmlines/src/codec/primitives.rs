//! Low-level wire primitives.
//!
//! `DataStream` appends fixed-layout values to any `io::Write` sink;
//! `Reader` is its zero-copy inverse over a byte slice. All multi-byte
//! integers and floats are little-endian.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{DecodeError, EncodeError};
use crate::limits::{HEADER_V6, MAX_TAG_INDEX, MAX_VARINT_BYTES};
use crate::model::{Tag, TagType};

// =============================================================================
// WRITER
// =============================================================================

/// Appends primitive values to a byte sink.
#[derive(Debug)]
pub struct DataStream<W> {
    inner: W,
    written: u64,
}

impl<W: Write> DataStream<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Number of bytes written through this stream so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes the file identification preamble.
    ///
    /// Only valid as the very first write on a fresh stream.
    pub fn write_header(&mut self) -> Result<(), EncodeError> {
        if self.written != 0 {
            return Err(EncodeError::HeaderNotFirst {
                written: self.written,
            });
        }
        self.write_bytes(HEADER_V6)
    }

    pub fn write_uint8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.inner.write_u8(value)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_uint32(&mut self, value: u32) -> Result<(), EncodeError> {
        self.inner.write_u32::<LittleEndian>(value)?;
        self.written += 4;
        Ok(())
    }

    pub fn write_float32(&mut self, value: f32) -> Result<(), EncodeError> {
        self.inner.write_f32::<LittleEndian>(value)?;
        self.written += 4;
        Ok(())
    }

    pub fn write_float64(&mut self, value: f64) -> Result<(), EncodeError> {
        self.inner.write_f64::<LittleEndian>(value)?;
        self.written += 8;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.write_uint8(value as u8)
    }

    /// Writes an unsigned LEB128 varuint using the minimal number of bytes.
    pub fn write_varuint(&mut self, mut value: u64) -> Result<(), EncodeError> {
        let mut buf = [0u8; MAX_VARINT_BYTES];
        let mut len = 0;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                buf[len] = byte;
                len += 1;
                break;
            }
            buf[len] = byte | 0x80;
            len += 1;
        }
        self.write_bytes(&buf[..len])
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Writes a packed (index, type) tag.
    pub fn write_tag(&mut self, index: u64, tag_type: TagType) -> Result<(), EncodeError> {
        let packed = Tag::new(index, tag_type)
            .pack()
            .ok_or(EncodeError::ValueOutOfRange {
                field: "tag index",
                value: index,
                max: MAX_TAG_INDEX,
            })?;
        self.write_varuint(packed)
    }
}

// =============================================================================
// READER
// =============================================================================

/// Reads primitive values from a byte slice without copying.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Checks and consumes the file identification preamble.
    pub fn read_header(&mut self) -> Result<(), DecodeError> {
        let header = self.read_bytes(HEADER_V6.len(), "header")?;
        if header != HEADER_V6 {
            return Err(DecodeError::InvalidHeader);
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof { context });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1, context)?[0])
    }

    pub fn read_u32(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4, context)?))
    }

    pub fn read_f32(&mut self, context: &'static str) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.read_bytes(4, context)?))
    }

    pub fn read_f64(&mut self, context: &'static str) -> Result<f64, DecodeError> {
        Ok(LittleEndian::read_f64(self.read_bytes(8, context)?))
    }

    pub fn read_bool(&mut self, context: &'static str) -> Result<bool, DecodeError> {
        match self.read_u8(context)? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            value => Err(DecodeError::InvalidBool { value }),
        }
    }

    pub fn read_varuint(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let mut result: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8(context)?;
            // The tenth byte may only carry the top bit of a u64.
            if i == MAX_VARINT_BYTES - 1 && byte > 0x01 {
                return Err(DecodeError::VarintOverflow {
                    max_bytes: MAX_VARINT_BYTES,
                });
            }
            result |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::VarintOverflow {
            max_bytes: MAX_VARINT_BYTES,
        })
    }

    pub fn read_tag(&mut self, context: &'static str) -> Result<Tag, DecodeError> {
        let packed = self.read_varuint(context)?;
        Tag::unpack(packed).map_err(|bits| DecodeError::InvalidTagType { bits })
    }
}
