//! Top-level block metadata.

/// Header fields of a top-level block, excluding the computed length.
///
/// The versions are carried opaquely; the encoder never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    pub block_type: u8,
    pub min_version: u8,
    pub current_version: u8,
}

impl BlockInfo {
    pub fn new(block_type: u8, min_version: u8, current_version: u8) -> Self {
        Self {
            block_type,
            min_version,
            current_version,
        }
    }
}
