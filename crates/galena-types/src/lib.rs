//! # galena-types: shared value types for the Galena storage engine
//!
//! This crate holds the types that cross crate boundaries inside the
//! workspace: the [`RecordPosition`] that the key directory hands out, and
//! the variable-length integer codec used by the record framing and the
//! position wire format.
//!
//! Keeping these in a leaf crate lets the key directory
//! (`galena-index`) and the engine (`galena`) agree on the wire format
//! without depending on each other.

pub mod varint;

use self::varint::{MAX_VARINT32_LEN, MAX_VARINT64_LEN, put_uvarint, put_varint, uvarint, varint};

/// Location of one log record inside the data directory.
///
/// A position uniquely identifies a record: the numbered segment it lives
/// in, the byte offset of its first header byte, and the encoded size of
/// the whole record. The key directory maps every live key to the position
/// of its most recent record.
///
/// `size` exists for reclaim accounting only; it is not part of the wire
/// format (see [`RecordPosition::encode`]) and decodes as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    /// Id of the segment file holding the record.
    pub file_id: u32,
    /// Byte offset of the record within the segment.
    pub offset: i64,
    /// Encoded size of the record in bytes.
    pub size: u32,
}

impl RecordPosition {
    /// Creates a new position.
    pub fn new(file_id: u32, offset: i64, size: u32) -> Self {
        Self {
            file_id,
            offset,
            size,
        }
    }

    /// Encodes the position for storage in hint records and the
    /// disk-backed directory.
    ///
    /// Wire format: `uvarint(file_id)` followed by `varint(offset)`
    /// (zig-zag). The record size is deliberately not part of the format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = [0u8; MAX_VARINT32_LEN + MAX_VARINT64_LEN];
        let mut idx = put_uvarint(&mut buf, u64::from(self.file_id));
        idx += put_varint(&mut buf[idx..], self.offset);
        buf[..idx].to_vec()
    }

    /// Decodes a position produced by [`RecordPosition::encode`].
    ///
    /// Returns `None` if the buffer is truncated or holds a file id that
    /// does not fit in 32 bits. The decoded `size` is zero.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (file_id, n) = uvarint(buf)?;
        let file_id = u32::try_from(file_id).ok()?;
        let (offset, _) = varint(&buf[n..])?;
        Some(Self {
            file_id,
            offset,
            size: 0,
        })
    }
}
