//! Binary encoding/decoding for the v6 tagged block format.

pub mod primitives;
pub mod reader;
pub mod writer;

pub use primitives::{DataStream, Reader};
pub use reader::TaggedBlockReader;
pub use writer::TaggedBlockWriter;
