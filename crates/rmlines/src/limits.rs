//! Wire constants and decoding limits for the v6 tagged block format.
//!
//! The limits protect the decoder against resource exhaustion when reading
//! untrusted files. The encoder uses the same values to reject anything a
//! decoder would refuse.

/// File identification preamble, written once at the start of every file.
pub const HEADER_V6: &[u8; 43] = b"reMarkable .lines file, version=6          ";

/// Maximum bytes for a varuint (LEB128 can overflow u64 at 10 bytes).
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum byte length of a block or subblock payload (the u32 length field).
pub const MAX_REGION_LEN: usize = u32::MAX as usize;

/// Number of low bits of a packed tag that carry the wire type.
pub const TAG_TYPE_BITS: u32 = 4;

/// Largest field index that still fits a packed tag.
pub const MAX_TAG_INDEX: u64 = u64::MAX >> TAG_TYPE_BITS;

/// Size of the fixed part of a top-level block header.
///
/// length(u32) + reserved(u8) + min_version(u8) + current_version(u8) + block_type(u8)
pub const BLOCK_HEADER_LEN: usize = 8;
