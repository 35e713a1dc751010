//! Tagged block decoder.
//!
//! The inverse of [`TaggedBlockWriter`](crate::codec::TaggedBlockWriter):
//! every read names the tag it expects and fails on a mismatch. Blocks and
//! subblocks are returned as nested readers limited to their payload.

use crate::codec::primitives::Reader;
use crate::error::DecodeError;
use crate::model::{BlockInfo, CrdtId, Tag, TagType};

/// Reads tagged values from a v6 stream or from a region payload.
#[derive(Debug, Clone)]
pub struct TaggedBlockReader<'a> {
    data: Reader<'a>,
}

impl<'a> TaggedBlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: Reader::new(data),
        }
    }

    pub fn read_header(&mut self) -> Result<(), DecodeError> {
        self.data.read_header()
    }

    pub fn is_at_end(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    /// Fails if unread bytes remain in this region.
    pub fn finish(&self, context: &'static str) -> Result<(), DecodeError> {
        if !self.data.is_empty() {
            return Err(DecodeError::RegionNotConsumed {
                context,
                remaining: self.data.remaining(),
            });
        }
        Ok(())
    }

    /// Returns the next tag without consuming it.
    pub fn peek_tag(&self) -> Result<Tag, DecodeError> {
        self.data.clone().read_tag("tag")
    }

    /// Reads the next top-level block, or `None` at end of input.
    pub fn read_block(&mut self) -> Result<Option<(BlockInfo, TaggedBlockReader<'a>)>, DecodeError> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let len = self.data.read_u32("block.length")? as usize;
        let _reserved = self.data.read_u8("block.reserved")?;
        let min_version = self.data.read_u8("block.min_version")?;
        let current_version = self.data.read_u8("block.current_version")?;
        let block_type = self.data.read_u8("block.type")?;
        let payload = self.read_region(len, "block.payload")?;
        Ok(Some((
            BlockInfo::new(block_type, min_version, current_version),
            payload,
        )))
    }

    /// Reads a subblock tagged with `index` and returns a reader over its payload.
    pub fn read_subblock(&mut self, index: u64) -> Result<TaggedBlockReader<'a>, DecodeError> {
        self.expect_tag(index, TagType::Length4)?;
        let len = self.data.read_u32("subblock.length")? as usize;
        self.read_region(len, "subblock.payload")
    }

    pub fn read_id(&mut self, index: u64) -> Result<CrdtId, DecodeError> {
        self.expect_tag(index, TagType::Id)?;
        let author = self.data.read_u8("id.author")?;
        let sequence = self.data.read_varuint("id.sequence")?;
        Ok(CrdtId::new(author, sequence))
    }

    pub fn read_bool(&mut self, index: u64) -> Result<bool, DecodeError> {
        self.expect_tag(index, TagType::Byte1)?;
        self.data.read_bool("bool")
    }

    pub fn read_byte(&mut self, index: u64) -> Result<u8, DecodeError> {
        self.expect_tag(index, TagType::Byte1)?;
        self.data.read_u8("byte")
    }

    pub fn read_int(&mut self, index: u64) -> Result<u32, DecodeError> {
        self.expect_tag(index, TagType::Byte4)?;
        self.data.read_u32("int")
    }

    pub fn read_float(&mut self, index: u64) -> Result<f32, DecodeError> {
        self.expect_tag(index, TagType::Byte4)?;
        self.data.read_f32("float")
    }

    pub fn read_double(&mut self, index: u64) -> Result<f64, DecodeError> {
        self.expect_tag(index, TagType::Byte8)?;
        self.data.read_f64("double")
    }

    pub fn read_string(&mut self, index: u64) -> Result<String, DecodeError> {
        let mut sub = self.read_subblock(index)?;
        let len = sub.data.read_varuint("string.length")? as usize;
        let flag = sub.data.read_u8("string.ascii")?;
        if flag != 0x01 {
            return Err(DecodeError::UnsupportedStringFlag { value: flag });
        }
        let bytes = sub.data.read_bytes(len, "string.bytes")?;
        let value = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        sub.finish("string")?;
        Ok(value.to_string())
    }

    fn expect_tag(&mut self, index: u64, tag_type: TagType) -> Result<(), DecodeError> {
        let tag = self.data.read_tag("tag")?;
        if tag.index != index || tag.tag_type != tag_type {
            return Err(DecodeError::UnexpectedTag {
                expected_index: index,
                expected_type: tag_type,
                found_index: tag.index,
                found_type: tag.tag_type,
            });
        }
        Ok(())
    }

    fn read_region(&mut self, len: usize, context: &'static str) -> Result<TaggedBlockReader<'a>, DecodeError> {
        if len > self.data.remaining() {
            return Err(DecodeError::LengthExceedsLimit {
                field: context,
                len,
                max: self.data.remaining(),
            });
        }
        let bytes = self.data.read_bytes(len, context)?;
        Ok(TaggedBlockReader::new(bytes))
    }
}
