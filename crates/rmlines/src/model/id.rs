//! CRDT identifiers.
//!
//! Every element of a replicated document is ordered by a `CrdtId`: the
//! author (writer session) that created it and a per-author sequence number.

use std::fmt;

/// Bit offset of the author within the combined identifier.
const AUTHOR_SHIFT: u32 = 48;

/// A compound (author, sequence) identifier.
///
/// On the wire the two parts are separate fields: the author as a single
/// byte, the sequence as a varuint. They are never packed into one integer,
/// since the sequence has no fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CrdtId {
    pub author: u8,
    pub sequence: u64,
}

impl CrdtId {
    pub const fn new(author: u8, sequence: u64) -> Self {
        Self { author, sequence }
    }

    /// Returns `(author << 48) | sequence`, or `None` if the sequence does
    /// not fit the low 48 bits.
    pub fn combined(&self) -> Option<u64> {
        if self.sequence >> AUTHOR_SHIFT != 0 {
            return None;
        }
        Some(((self.author as u64) << AUTHOR_SHIFT) | self.sequence)
    }
}

impl fmt::Display for CrdtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.author, self.sequence)
    }
}

impl From<(u8, u64)> for CrdtId {
    fn from((author, sequence): (u8, u64)) -> Self {
        Self::new(author, sequence)
    }
}
