//! Data model types for the tagged block format.
//!
//! - Identifiers (`CrdtId`)
//! - Tags (field index + wire type)
//! - Block header metadata

pub mod block;
pub mod id;
pub mod tag;

pub use block::BlockInfo;
pub use id::CrdtId;
pub use tag::{Tag, TagType};
