//! Error types for encoding and decoding.

use thiserror::Error;

use crate::model::TagType;

/// Errors raised while writing a tagged block stream.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A top-level block was opened while another one is still open.
    #[error("already in a block")]
    AlreadyInBlock,

    /// A close did not match the innermost open region.
    #[error("unbalanced region close: expected to close {expected}, innermost open region is {found}")]
    UnbalancedRegion {
        expected: &'static str,
        found: &'static str,
    },

    /// The file header was requested after other bytes were written.
    #[error("file header must be the first write, {written} byte(s) already written")]
    HeaderNotFirst { written: u64 },

    /// The writer was finished while regions were still open.
    #[error("{depth} region(s) still open")]
    UnclosedRegion { depth: usize },

    /// A value does not fit the slot it is encoded into.
    #[error("{field} value {value} exceeds maximum {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// The underlying sink failed.
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading a tagged block stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input ended before the named field was complete.
    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    /// The file does not start with the v6 preamble.
    #[error("invalid file header")]
    InvalidHeader,

    /// A bool byte was neither 0 nor 1.
    #[error("invalid bool byte 0x{value:02x}")]
    InvalidBool { value: u8 },

    /// A varuint does not fit a u64.
    #[error("varuint exceeds {max_bytes} bytes")]
    VarintOverflow { max_bytes: usize },

    /// The low tag bits name no known wire type.
    #[error("invalid tag type 0x{bits:x}")]
    InvalidTagType { bits: u8 },

    /// The next tag is not the (index, type) the caller asked for.
    #[error("expected tag ({expected_index}, {expected_type:?}), found ({found_index}, {found_type:?})")]
    UnexpectedTag {
        expected_index: u64,
        expected_type: TagType,
        found_index: u64,
        found_type: TagType,
    },

    /// A declared region length runs past the enclosing data.
    #[error("{field} length {len} exceeds limit {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// String payload bytes are not UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// A string subblock carries a flag other than ascii (0x01).
    #[error("string flag byte 0x{value:02x} is not supported")]
    UnsupportedStringFlag { value: u8 },

    /// A region was finished with bytes left unread.
    #[error("{remaining} trailing byte(s) left in {context}")]
    RegionNotConsumed {
        context: &'static str,
        remaining: usize,
    },
}
