//! Tagged block encoder.
//!
//! Values are written as a packed tag followed by their payload. Blocks and
//! subblocks are length-prefixed, but their length is only known once their
//! content exists, so every open region buffers its writes in a shadow
//! buffer. Closing a region pops the buffer and flushes header + payload
//! into whatever target is active underneath it.

use std::io::Write;

use tracing::{debug, trace};

use crate::codec::primitives::DataStream;
use crate::error::EncodeError;
use crate::limits::{MAX_REGION_LEN, MAX_TAG_INDEX};
use crate::model::{BlockInfo, CrdtId, TagType};

#[derive(Debug, Clone, Copy)]
enum Region {
    Block(BlockInfo),
    Subblock(u64),
}

impl Region {
    fn kind(&self) -> &'static str {
        match self {
            Region::Block(_) => "block",
            Region::Subblock(_) => "subblock",
        }
    }
}

#[derive(Debug)]
struct Frame {
    region: Region,
    data: DataStream<Vec<u8>>,
    /// Owned by a `write_block`/`write_subblock` call; only that call may close it.
    scoped: bool,
}

/// Runs `$body` with `$s` bound to the innermost active write target.
macro_rules! with_active {
    ($self:ident, |$s:ident| $body:expr) => {
        match $self.stack.last_mut() {
            Some(frame) => {
                let $s = &mut frame.data;
                $body
            }
            None => {
                let $s = &mut $self.sink;
                $body
            }
        }
    };
}

/// Writes tagged values, blocks and subblocks to a v6 stream.
#[derive(Debug)]
pub struct TaggedBlockWriter<W> {
    sink: DataStream<W>,
    stack: Vec<Frame>,
}

impl<W: Write> TaggedBlockWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: DataStream::new(sink),
            stack: Vec::new(),
        }
    }

    /// Number of currently open blocks and subblocks.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether a top-level block is open.
    pub fn in_block(&self) -> bool {
        self.stack
            .iter()
            .any(|frame| matches!(frame.region, Region::Block(_)))
    }

    /// Returns the sink. Fails if any region is still open.
    pub fn into_inner(self) -> Result<W, EncodeError> {
        if !self.stack.is_empty() {
            return Err(EncodeError::UnclosedRegion {
                depth: self.stack.len(),
            });
        }
        Ok(self.sink.into_inner())
    }

    /// Writes the file header. Must be the first call on a fresh output.
    pub fn write_header(&mut self) -> Result<(), EncodeError> {
        if !self.stack.is_empty() {
            let buffered: u64 = self.stack.iter().map(|frame| frame.data.written()).sum();
            return Err(EncodeError::HeaderNotFirst {
                written: self.sink.written() + buffered,
            });
        }
        self.sink.write_header()
    }

    // =========================================================================
    // TAGGED VALUES
    // =========================================================================

    pub fn write_id(&mut self, index: u64, value: CrdtId) -> Result<(), EncodeError> {
        with_active!(self, |s| {
            s.write_tag(index, TagType::Id)?;
            s.write_uint8(value.author)?;
            s.write_varuint(value.sequence)
        })
    }

    pub fn write_bool(&mut self, index: u64, value: bool) -> Result<(), EncodeError> {
        with_active!(self, |s| {
            s.write_tag(index, TagType::Byte1)?;
            s.write_bool(value)
        })
    }

    pub fn write_byte(&mut self, index: u64, value: u8) -> Result<(), EncodeError> {
        with_active!(self, |s| {
            s.write_tag(index, TagType::Byte1)?;
            s.write_uint8(value)
        })
    }

    /// Writes a 4-byte integer. The wire value is unsigned.
    pub fn write_int(&mut self, index: u64, value: u32) -> Result<(), EncodeError> {
        with_active!(self, |s| {
            s.write_tag(index, TagType::Byte4)?;
            s.write_uint32(value)
        })
    }

    pub fn write_float(&mut self, index: u64, value: f32) -> Result<(), EncodeError> {
        with_active!(self, |s| {
            s.write_tag(index, TagType::Byte4)?;
            s.write_float32(value)
        })
    }

    pub fn write_double(&mut self, index: u64, value: f64) -> Result<(), EncodeError> {
        with_active!(self, |s| {
            s.write_tag(index, TagType::Byte8)?;
            s.write_float64(value)
        })
    }

    /// Writes a string as a subblock: byte length varuint, ascii flag, UTF-8 bytes.
    pub fn write_string(&mut self, index: u64, value: &str) -> Result<(), EncodeError> {
        self.write_subblock(index, |w| {
            with_active!(w, |s| {
                s.write_varuint(value.len() as u64)?;
                s.write_bool(true)?;
                s.write_bytes(value.as_bytes())
            })
        })
    }

    // =========================================================================
    // REGIONS
    // =========================================================================

    /// Opens a top-level block. Only one block may be open at a time.
    pub fn open_block(&mut self, info: BlockInfo) -> Result<(), EncodeError> {
        if self.in_block() {
            return Err(EncodeError::AlreadyInBlock);
        }
        self.push(Region::Block(info));
        Ok(())
    }

    /// Closes the innermost region, which must be a block, and writes its
    /// header and payload to the enclosing target.
    pub fn close_block(&mut self) -> Result<(), EncodeError> {
        self.check_unscoped("block")?;
        self.emit_block()
    }

    fn emit_block(&mut self) -> Result<(), EncodeError> {
        let info = match self.stack.last().map(|frame| frame.region) {
            Some(Region::Block(info)) => info,
            other => {
                return Err(EncodeError::UnbalancedRegion {
                    expected: "block",
                    found: other.map_or("none", |region| region.kind()),
                });
            }
        };
        let payload = self.pop_payload();
        let len = region_len(&payload, "block length")?;
        trace!(
            block_type = info.block_type,
            len,
            depth = self.stack.len(),
            "close block"
        );
        with_active!(self, |s| {
            s.write_uint32(len)?;
            s.write_uint8(0)?;
            s.write_uint8(info.min_version)?;
            s.write_uint8(info.current_version)?;
            s.write_uint8(info.block_type)?;
            s.write_bytes(&payload)
        })
    }

    /// Opens a subblock tagged with `index` inside the active target.
    pub fn open_subblock(&mut self, index: u64) -> Result<(), EncodeError> {
        if index > MAX_TAG_INDEX {
            return Err(EncodeError::ValueOutOfRange {
                field: "tag index",
                value: index,
                max: MAX_TAG_INDEX,
            });
        }
        self.push(Region::Subblock(index));
        Ok(())
    }

    /// Closes the innermost region, which must be a subblock.
    pub fn close_subblock(&mut self) -> Result<(), EncodeError> {
        self.check_unscoped("subblock")?;
        self.emit_subblock()
    }

    fn emit_subblock(&mut self) -> Result<(), EncodeError> {
        let index = match self.stack.last().map(|frame| frame.region) {
            Some(Region::Subblock(index)) => index,
            other => {
                return Err(EncodeError::UnbalancedRegion {
                    expected: "subblock",
                    found: other.map_or("none", |region| region.kind()),
                });
            }
        };
        let payload = self.pop_payload();
        let len = region_len(&payload, "subblock length")?;
        trace!(index, len, depth = self.stack.len(), "close subblock");
        with_active!(self, |s| {
            s.write_tag(index, TagType::Length4)?;
            s.write_uint32(len)?;
            s.write_bytes(&payload)
        })
    }

    /// Writes a block whose content is produced by `f`.
    ///
    /// The block is removed from the stack on every exit path. If `f` fails,
    /// its buffered content is discarded and the error returned.
    pub fn write_block<T, F>(&mut self, info: BlockInfo, f: F) -> Result<T, EncodeError>
    where
        F: FnOnce(&mut Self) -> Result<T, EncodeError>,
    {
        self.open_block(info)?;
        let value = self.run_scoped("block", f)?;
        self.emit_block()?;
        Ok(value)
    }

    /// Writes a subblock whose content is produced by `f`.
    pub fn write_subblock<T, F>(&mut self, index: u64, f: F) -> Result<T, EncodeError>
    where
        F: FnOnce(&mut Self) -> Result<T, EncodeError>,
    {
        self.open_subblock(index)?;
        let value = self.run_scoped("subblock", f)?;
        self.emit_subblock()?;
        Ok(value)
    }

    fn run_scoped<T, F>(&mut self, kind: &'static str, f: F) -> Result<T, EncodeError>
    where
        F: FnOnce(&mut Self) -> Result<T, EncodeError>,
    {
        let depth = self.stack.len();
        if let Some(frame) = self.stack.last_mut() {
            frame.scoped = true;
        }
        let result = f(self).and_then(|value| {
            if self.stack.len() > depth {
                Err(EncodeError::UnclosedRegion {
                    depth: self.stack.len() - depth,
                })
            } else if self.stack.len() < depth {
                Err(EncodeError::UnbalancedRegion {
                    expected: kind,
                    found: "none",
                })
            } else {
                Ok(value)
            }
        });
        if result.is_err() {
            self.abandon(depth.saturating_sub(1));
        }
        result
    }

    fn push(&mut self, region: Region) {
        trace!(region = region.kind(), depth = self.stack.len() + 1, "open region");
        self.stack.push(Frame {
            region,
            data: DataStream::new(Vec::new()),
            scoped: false,
        });
    }

    fn check_unscoped(&self, expected: &'static str) -> Result<(), EncodeError> {
        match self.stack.last() {
            Some(frame) if frame.scoped => Err(EncodeError::UnbalancedRegion {
                expected,
                found: "scoped region",
            }),
            _ => Ok(()),
        }
    }

    fn pop_payload(&mut self) -> Vec<u8> {
        self.stack
            .pop()
            .map(|frame| frame.data.into_inner())
            .unwrap_or_default()
    }

    /// Drops every region above `depth` without emitting it.
    fn abandon(&mut self, depth: usize) {
        while self.stack.len() > depth {
            if let Some(frame) = self.stack.pop() {
                debug!(
                    region = frame.region.kind(),
                    buffered = frame.data.written(),
                    "abandoning region after error"
                );
            }
        }
    }
}

fn region_len(payload: &[u8], field: &'static str) -> Result<u32, EncodeError> {
    if payload.len() > MAX_REGION_LEN {
        return Err(EncodeError::ValueOutOfRange {
            field,
            value: payload.len() as u64,
            max: MAX_REGION_LEN as u64,
        });
    }
    Ok(payload.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::reader::TaggedBlockReader;
    use crate::error::DecodeError;
    use proptest::prelude::*;

    fn info() -> BlockInfo {
        BlockInfo::new(7, 1, 2)
    }

    #[test]
    fn test_record_scenario() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer
            .write_block(info(), |w| {
                w.write_id(1, CrdtId::new(3, 5))?;
                w.write_bool(2, true)?;
                w.write_int(3, 42)
            })
            .unwrap();
        let bytes = writer.into_inner().unwrap();

        // id: tag + author + seq = 3, bool: 2, int: 5
        assert_eq!(
            bytes,
            vec![10, 0, 0, 0, 0, 1, 2, 7, 0x1F, 3, 5, 0x21, 1, 0x34, 42, 0, 0, 0]
        );

        let mut reader = TaggedBlockReader::new(&bytes);
        let (decoded, mut payload) = reader.read_block().unwrap().unwrap();
        assert_eq!(decoded, info());
        assert_eq!(payload.read_id(1).unwrap(), CrdtId::new(3, 5));
        assert!(payload.read_bool(2).unwrap());
        assert_eq!(payload.read_int(3).unwrap(), 42);
        payload.finish("block").unwrap();
        assert!(reader.read_block().unwrap().is_none());
    }

    #[test]
    fn test_nested_subblock_layout() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.open_subblock(1).unwrap();
        writer.write_byte(9, 0xAA).unwrap();
        writer.open_subblock(2).unwrap();
        writer.write_byte(3, 0xBB).unwrap();
        writer.close_subblock().unwrap();
        writer.write_byte(4, 0xCC).unwrap();
        writer.close_subblock().unwrap();
        let bytes = writer.into_inner().unwrap();

        let inner = [0x31, 0xBB];
        let mut b = vec![0x2C];
        b.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        b.extend_from_slice(&inner);
        // (9 << 4) | 1 = 145 needs a second varuint byte.
        let mut a_payload = vec![0x91, 0x01, 0xAA];
        a_payload.extend_from_slice(&b);
        a_payload.extend_from_slice(&[0x41, 0xCC]);
        let mut expected = vec![0x1C];
        expected.extend_from_slice(&(a_payload.len() as u32).to_le_bytes());
        expected.extend_from_slice(&a_payload);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_scoped_block_cannot_be_closed_by_closure() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        let result = writer.write_block(info(), |w| {
            w.write_int(1, 42)?;
            w.close_block()
        });
        assert!(matches!(
            result,
            Err(EncodeError::UnbalancedRegion { expected: "block", found: "scoped region" })
        ));
        assert_eq!(writer.depth(), 0);
        assert!(writer.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_scoped_subblock_failure_leaves_no_bytes() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.open_block(info()).unwrap();
        writer.write_int(1, 1).unwrap();
        let result = writer.write_subblock(2, |w| {
            w.write_int(1, 7)?;
            w.close_subblock()?;
            w.open_subblock(9)
        });
        assert!(matches!(
            result,
            Err(EncodeError::UnbalancedRegion { expected: "subblock", found: "scoped region" })
        ));
        assert_eq!(writer.depth(), 1);

        writer.close_block().unwrap();
        let bytes = writer.into_inner().unwrap();
        let (_, mut payload) = TaggedBlockReader::new(&bytes).read_block().unwrap().unwrap();
        assert_eq!(payload.read_int(1).unwrap(), 1);
        assert!(payload.is_at_end());
    }

    #[test]
    fn test_explicit_subblock_inside_scope_closes_normally() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer
            .write_block(info(), |w| {
                w.open_subblock(1)?;
                w.write_byte(1, 3)?;
                w.close_subblock()
            })
            .unwrap();
        let bytes = writer.into_inner().unwrap();
        let (_, mut payload) = TaggedBlockReader::new(&bytes).read_block().unwrap().unwrap();
        let mut sub = payload.read_subblock(1).unwrap();
        assert_eq!(sub.read_byte(1).unwrap(), 3);
        payload.finish("block").unwrap();
    }

    #[test]
    fn test_open_subblock_index_out_of_range() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        assert!(matches!(
            writer.open_subblock(u64::MAX),
            Err(EncodeError::ValueOutOfRange { field: "tag index", .. })
        ));
        assert_eq!(writer.depth(), 0);
        assert!(writer.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_illegal_nesting_keeps_first_block() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.open_block(info()).unwrap();
        writer.write_int(1, 5).unwrap();

        let result = writer.write_block(BlockInfo::new(1, 0, 0), |w| w.write_int(2, 6));
        assert!(matches!(result, Err(EncodeError::AlreadyInBlock)));
        assert!(matches!(
            writer.open_block(info()),
            Err(EncodeError::AlreadyInBlock)
        ));
        assert_eq!(writer.depth(), 1);

        writer.close_block().unwrap();
        let bytes = writer.into_inner().unwrap();
        let (decoded, mut payload) = TaggedBlockReader::new(&bytes).read_block().unwrap().unwrap();
        assert_eq!(decoded, info());
        assert_eq!(payload.read_int(1).unwrap(), 5);
        assert!(payload.is_at_end());
    }

    #[test]
    fn test_subblocks_allowed_inside_block() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer
            .write_block(info(), |w| {
                w.write_subblock(1, |w| w.write_subblock(2, |w| w.write_double(1, 0.5)))?;
                w.write_subblock(3, |w| w.write_float(1, 1.5))
            })
            .unwrap();
        let bytes = writer.into_inner().unwrap();

        let (_, mut payload) = TaggedBlockReader::new(&bytes).read_block().unwrap().unwrap();
        let mut first = payload.read_subblock(1).unwrap();
        let mut second = first.read_subblock(2).unwrap();
        assert_eq!(second.read_double(1).unwrap(), 0.5);
        first.finish("subblock").unwrap();
        let mut third = payload.read_subblock(3).unwrap();
        assert_eq!(third.read_float(1).unwrap(), 1.5);
        payload.finish("block").unwrap();
    }

    #[test]
    fn test_block_length_matches_payload() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.write_header().unwrap();
        for block_type in 0..3u8 {
            writer
                .write_block(BlockInfo::new(block_type, 1, 1), |w| {
                    for i in 0..block_type as u64 {
                        w.write_string(i, "stroke")?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        let bytes = writer.into_inner().unwrap();

        let mut offset = 43;
        let mut seen = 0;
        while offset < bytes.len() {
            let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            assert_eq!(bytes[offset + 4], 0);
            assert_eq!(bytes[offset + 7], seen);
            offset += 8 + len;
            seen += 1;
        }
        assert_eq!(offset, bytes.len());
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_closure_error_restores_target() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.open_block(info()).unwrap();
        writer.write_int(1, 1).unwrap();
        let result = writer.write_subblock(2, |w| {
            w.write_int(1, 99)?;
            w.open_subblock(5)?;
            w.write_byte(u64::MAX, 0)
        });
        assert!(matches!(result, Err(EncodeError::ValueOutOfRange { .. })));
        assert_eq!(writer.depth(), 1);

        writer.write_int(3, 3).unwrap();
        writer.close_block().unwrap();
        let bytes = writer.into_inner().unwrap();
        let (_, mut payload) = TaggedBlockReader::new(&bytes).read_block().unwrap().unwrap();
        assert_eq!(payload.read_int(1).unwrap(), 1);
        assert_eq!(payload.read_int(3).unwrap(), 3);
        assert!(payload.is_at_end());
    }

    #[test]
    fn test_unclosed_inner_region_in_scope() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        let result = writer.write_block(info(), |w| w.open_subblock(1));
        assert!(matches!(result, Err(EncodeError::UnclosedRegion { depth: 1 })));
        assert_eq!(writer.depth(), 0);
        assert!(writer.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_unbalanced_close() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        assert!(matches!(
            writer.close_block(),
            Err(EncodeError::UnbalancedRegion { expected: "block", found: "none" })
        ));
        writer.open_block(info()).unwrap();
        writer.open_subblock(1).unwrap();
        assert!(matches!(
            writer.close_block(),
            Err(EncodeError::UnbalancedRegion { expected: "block", found: "subblock" })
        ));
        assert_eq!(writer.depth(), 2);
        writer.close_subblock().unwrap();
        assert!(matches!(
            writer.close_subblock(),
            Err(EncodeError::UnbalancedRegion { expected: "subblock", found: "block" })
        ));
        writer.close_block().unwrap();
    }

    #[test]
    fn test_into_inner_with_open_region() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.open_block(info()).unwrap();
        writer.open_subblock(1).unwrap();
        assert!(matches!(
            writer.into_inner(),
            Err(EncodeError::UnclosedRegion { depth: 2 })
        ));
    }

    #[test]
    fn test_header_only_first() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.open_block(info()).unwrap();
        writer.write_int(1, 1).unwrap();
        assert!(matches!(
            writer.write_header(),
            Err(EncodeError::HeaderNotFirst { written: 5 })
        ));
    }

    #[test]
    fn test_write_string_layout() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.write_string(2, "hi").unwrap();
        let bytes = writer.into_inner().unwrap();
        assert_eq!(bytes, vec![0x2C, 4, 0, 0, 0, 2, 1, b'h', b'i']);
        let mut reader = TaggedBlockReader::new(&bytes);
        assert_eq!(reader.read_string(2).unwrap(), "hi");
    }

    #[test]
    fn test_sink_failure_propagates_on_close() {
        let mut buf = [0u8; 4];
        let mut writer = TaggedBlockWriter::new(&mut buf[..]);
        let result = writer.write_block(info(), |w| w.write_int(1, 1));
        assert!(matches!(result, Err(EncodeError::Io(_))));
        assert_eq!(writer.depth(), 0);
    }

    #[test]
    fn test_wrong_tag_rejected_by_reader() {
        let mut writer = TaggedBlockWriter::new(Vec::new());
        writer.write_float(1, 1.0).unwrap();
        let bytes = writer.into_inner().unwrap();
        let result = TaggedBlockReader::new(&bytes).read_double(1);
        assert!(matches!(result, Err(DecodeError::UnexpectedTag { .. })));
    }

    #[derive(Debug, Clone)]
    enum Node {
        Int(u64, u32),
        Id(u64, CrdtId),
        Sub(u64, Vec<Node>),
    }

    fn node_strategy() -> impl Strategy<Value = Node> {
        let leaf = prop_oneof![
            (0u64..32, any::<u32>()).prop_map(|(i, v)| Node::Int(i, v)),
            (0u64..32, any::<u8>(), any::<u64>()).prop_map(|(i, a, s)| Node::Id(i, CrdtId::new(a, s))),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            (0u64..32, prop::collection::vec(inner, 0..4)).prop_map(|(i, children)| Node::Sub(i, children))
        })
    }

    fn encode_node<W: Write>(w: &mut TaggedBlockWriter<W>, node: &Node) -> Result<(), EncodeError> {
        match node {
            Node::Int(i, v) => w.write_int(*i, *v),
            Node::Id(i, id) => w.write_id(*i, *id),
            Node::Sub(i, children) => w.write_subblock(*i, |w| {
                for child in children {
                    encode_node(w, child)?;
                }
                Ok(())
            }),
        }
    }

    fn check_node(r: &mut TaggedBlockReader<'_>, node: &Node) -> Result<(), DecodeError> {
        match node {
            Node::Int(i, v) => assert_eq!(r.read_int(*i)?, *v),
            Node::Id(i, id) => assert_eq!(r.read_id(*i)?, *id),
            Node::Sub(i, children) => {
                let mut sub = r.read_subblock(*i)?;
                for child in children {
                    check_node(&mut sub, child)?;
                }
                sub.finish("subblock")?;
            }
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_nested_regions_roundtrip(nodes in prop::collection::vec(node_strategy(), 0..6)) {
            let mut writer = TaggedBlockWriter::new(Vec::new());
            writer.write_header().unwrap();
            writer.write_block(info(), |w| {
                for node in &nodes {
                    encode_node(w, node)?;
                }
                Ok(())
            }).unwrap();
            let bytes = writer.into_inner().unwrap();

            let mut reader = TaggedBlockReader::new(&bytes);
            reader.read_header().unwrap();
            let (decoded, mut payload) = reader.read_block().unwrap().unwrap();
            prop_assert_eq!(decoded, info());
            for node in &nodes {
                check_node(&mut payload, node).unwrap();
            }
            payload.finish("block").unwrap();
            prop_assert!(reader.is_at_end());
        }
    }
}
