//! Tagged block container encoding for reMarkable v6 `.lines` documents.
//!
//! Every value in the container is self-describing: a packed tag carries a
//! field index and a wire type, followed by the payload. Records are grouped
//! into length-prefixed top-level blocks and nested subblocks, which lets a
//! decoder skip anything it does not understand.
//!
//! # Quick Start
//!
//! ```rust
//! use rmlines::{BlockInfo, CrdtId, TaggedBlockReader, TaggedBlockWriter};
//!
//! let mut writer = TaggedBlockWriter::new(Vec::new());
//! writer.write_header().unwrap();
//! writer
//!     .write_block(BlockInfo::new(7, 1, 2), |w| {
//!         w.write_id(1, CrdtId::new(3, 5))?;
//!         w.write_subblock(2, |w| w.write_string(1, "layer"))
//!     })
//!     .unwrap();
//! let bytes = writer.into_inner().unwrap();
//!
//! let mut reader = TaggedBlockReader::new(&bytes);
//! reader.read_header().unwrap();
//! let (info, mut block) = reader.read_block().unwrap().unwrap();
//! assert_eq!(info.block_type, 7);
//! assert_eq!(block.read_id(1).unwrap(), CrdtId::new(3, 5));
//! ```
//!
//! # Modules
//!
//! - [`model`]: identifiers, tags and block metadata
//! - [`codec`]: primitive stream, tagged writer and its inverse reader
//! - [`error`]: error types
//! - [`limits`]: wire constants and decoding limits
//!
//! # Wire Format
//!
//! - File header: 43-byte ASCII preamble
//! - Block: `u32 length, 0x00, min_version, current_version, block_type, payload`
//! - Subblock: `tag(index, Length4), u32 length, payload`
//! - Tag: `varuint(index << 4 | type)`
//!
//! All fixed-width values are little-endian.

pub mod codec;
pub mod error;
pub mod limits;
pub mod model;

pub use codec::{DataStream, Reader, TaggedBlockReader, TaggedBlockWriter};
pub use error::{DecodeError, EncodeError};
pub use model::{BlockInfo, CrdtId, Tag, TagType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
