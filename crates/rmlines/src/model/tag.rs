//! Tag headers: a field index packed together with a wire type.
//!
//! A tag is written as `varuint((index << 4) | type)`. The decoder relies on
//! this exact layout, so it must not change.

use crate::limits::{MAX_TAG_INDEX, TAG_TYPE_BITS};

/// Wire type of a tagged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagType {
    /// One byte: bool or u8.
    Byte1 = 0x1,
    /// Four bytes: u32 or f32.
    Byte4 = 0x4,
    /// Eight bytes: f64.
    Byte8 = 0x8,
    /// u32 length followed by that many bytes (subblocks, strings).
    Length4 = 0xC,
    /// CRDT identifier: author byte then sequence varuint.
    Id = 0xF,
}

impl TagType {
    pub fn from_u8(bits: u8) -> Option<Self> {
        match bits {
            0x1 => Some(TagType::Byte1),
            0x4 => Some(TagType::Byte4),
            0x8 => Some(TagType::Byte8),
            0xC => Some(TagType::Length4),
            0xF => Some(TagType::Id),
            _ => None,
        }
    }
}

/// A decoded (index, type) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub index: u64,
    pub tag_type: TagType,
}

impl Tag {
    pub fn new(index: u64, tag_type: TagType) -> Self {
        Self { index, tag_type }
    }

    /// Packs the tag into its varuint payload, or `None` if the index is too
    /// large to leave room for the type bits.
    pub fn pack(&self) -> Option<u64> {
        if self.index > MAX_TAG_INDEX {
            return None;
        }
        Some((self.index << TAG_TYPE_BITS) | self.tag_type as u64)
    }

    /// Splits a packed value into index and type. Returns the raw type bits
    /// on failure.
    pub fn unpack(packed: u64) -> Result<Self, u8> {
        let bits = (packed & 0xF) as u8;
        let tag_type = TagType::from_u8(bits).ok_or(bits)?;
        Ok(Self {
            index: packed >> TAG_TYPE_BITS,
            tag_type,
        })
    }
}
