//! Log record framing.
//!
//! Every mutation is persisted as one record appended to the active
//! segment:
//!
//! ```text
//! ┌──────────┬────────┬───────────────┬───────────────┬───────┬─────────┐
//! │ crc: u32 │ kind   │ key_size      │ value_size    │ key   │ value   │
//! │ (LE)     │ (1B)   │ (varint, zz)  │ (varint, zz)  │ bytes │ bytes   │
//! └──────────┴────────┴───────────────┴───────────────┴───────┴─────────┘
//! ```
//!
//! The checksum covers everything after itself. Key and value sizes are
//! signed zig-zag varints; the header reserves room for two 32-bit
//! varints, which is sound because sizes are capped at `2^31 - 1` before
//! a record reaches the encoder.
//!
//! The key stored on disk is never the raw user key: it carries an
//! unsigned-varint batch sequence prefix, `0` for non-batched writes.

use galena_types::varint;

/// Keys and values may not exceed `2^31 - 1` bytes.
pub(crate) const MAX_RECORD_DATA_SIZE: usize = i32::MAX as usize;

/// Width of the checksum field.
pub(crate) const CRC_SIZE: usize = 4;

/// Sequence prefix given to writes outside any batch.
pub(crate) const NON_BATCH_SEQ: u64 = 0;

/// Largest possible encoded header: crc, kind, two 32-bit varints.
pub(crate) const fn max_record_header_size() -> usize {
    CRC_SIZE + 1 + 2 * varint::MAX_VARINT32_LEN
}

/// What a log record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordKind {
    /// A live key-value pair.
    Normal = 0,
    /// A tombstone; the key is dead until written again.
    Deleted = 1,
    /// Marks every record of its sequence as committed.
    TxnFinished = 2,
    /// A directory entry emitted by merge into the hint file.
    Hint = 3,
    /// The persisted batch sequence, written at close.
    SeqId = 4,
}

impl RecordKind {
    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Normal),
            1 => Some(Self::Deleted),
            2 => Some(Self::TxnFinished),
            3 => Some(Self::Hint),
            4 => Some(Self::SeqId),
            _ => None,
        }
    }
}

/// One record, in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogRecord {
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) kind: RecordKind,
}

impl LogRecord {
    /// Encodes the record, returning the buffer and its total size.
    pub(crate) fn encode(&self) -> (Vec<u8>, u64) {
        let mut header = [0u8; max_record_header_size()];
        header[CRC_SIZE] = self.kind as u8;
        let mut idx = CRC_SIZE + 1;
        idx += varint::put_varint(&mut header[idx..], self.key.len() as i64);
        idx += varint::put_varint(&mut header[idx..], self.value.len() as i64);

        let total = idx + self.key.len() + self.value.len();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&header[..idx]);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        (buf, total as u64)
    }
}

/// A record read back from a segment, with its encoded size.
#[derive(Debug)]
pub(crate) struct ReadRecord {
    pub(crate) record: LogRecord,
    pub(crate) size: u64,
}

/// Decoded header fields; the kind byte stays raw until the checksum has
/// been verified.
#[derive(Debug)]
pub(crate) struct RecordHeader {
    pub(crate) crc: u32,
    pub(crate) kind: u8,
    pub(crate) key_size: i64,
    pub(crate) value_size: i64,
}

impl RecordHeader {
    /// A zeroed header marks the pre-allocated tail of a segment.
    pub(crate) fn is_empty(&self) -> bool {
        self.crc == 0 && self.key_size == 0 && self.value_size == 0
    }
}

/// Decodes a header from the front of `buf`.
///
/// Returns the header and its encoded length, or `None` when fewer than
/// header-length bytes remain — which callers treat as end-of-file.
pub(crate) fn decode_record_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }
    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = buf[CRC_SIZE];
    let mut idx = CRC_SIZE + 1;
    let (key_size, n) = varint::varint(&buf[idx..])?;
    idx += n;
    let (value_size, n) = varint::varint(&buf[idx..])?;
    idx += n;
    Some((
        RecordHeader {
            crc,
            kind,
            key_size,
            value_size,
        },
        idx,
    ))
}

/// Checksum over the post-crc header bytes, the key, and the value.
pub(crate) fn record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Prefixes `key` with the unsigned-varint `seq`.
pub(crate) fn key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut seq_buf = [0u8; varint::MAX_VARINT64_LEN];
    let n = varint::put_uvarint(&mut seq_buf, seq);
    let mut out = Vec::with_capacity(n + key.len());
    out.extend_from_slice(&seq_buf[..n]);
    out.extend_from_slice(key);
    out
}

/// Splits a stored key into `(real_key, seq)`.
pub(crate) fn parse_record_key(key: &[u8]) -> (Vec<u8>, u64) {
    match varint::uvarint(key) {
        Some((seq, n)) => (key[n..].to_vec(), seq),
        // only reachable on foreign bytes; treat as an unsequenced key
        None => (key.to_vec(), NON_BATCH_SEQ),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_matches_reference_bytes() {
        let record = LogRecord {
            key: b"key".to_vec(),
            value: b"val".to_vec(),
            kind: RecordKind::Normal,
        };
        let (buf, size) = record.encode();
        assert_eq!(size, 13);
        assert_eq!(buf, vec![
            0xd6, 0xa3, 0xfe, 0x0e, // crc32, little-endian
            0x00, // kind: normal
            0x06, // key_size 3, zig-zag
            0x06, // value_size 3, zig-zag
            b'k', b'e', b'y', b'v', b'a', b'l',
        ]);
    }

    #[test]
    fn sequence_prefix_reference_bytes() {
        let encoded = key_with_seq(b"123", 1);
        assert_eq!(encoded, vec![0x01, b'1', b'2', b'3']);
        let (key, seq) = parse_record_key(&encoded);
        assert_eq!(key, b"123");
        assert_eq!(seq, 1);
    }

    #[test]
    fn non_batch_prefix_is_one_zero_byte() {
        let encoded = key_with_seq(b"k", NON_BATCH_SEQ);
        assert_eq!(encoded, vec![0x00, b'k']);
        assert_eq!(parse_record_key(&encoded), (b"k".to_vec(), 0));
    }

    #[test]
    fn header_round_trip() {
        let record = LogRecord {
            key: b"abc".to_vec(),
            value: b"defgh".to_vec(),
            kind: RecordKind::Deleted,
        };
        let (buf, _) = record.encode();
        let (header, header_size) = decode_record_header(&buf).unwrap();
        assert_eq!(header.kind, RecordKind::Deleted as u8);
        assert_eq!(header.key_size, 3);
        assert_eq!(header.value_size, 5);
        assert_eq!(header_size, 7);

        let crc = record_crc(&buf[CRC_SIZE..header_size], b"abc", b"defgh");
        assert_eq!(crc, header.crc);
    }

    #[test]
    fn short_buffers_read_as_eof() {
        assert!(decode_record_header(&[]).is_none());
        assert!(decode_record_header(&[0xd6, 0xa3, 0xfe, 0x0e]).is_none());
        // crc + kind but a truncated size varint
        assert!(decode_record_header(&[0, 0, 0, 0, 0x00, 0x80]).is_none());
    }

    #[test]
    fn zeroed_header_is_empty() {
        let (header, _) = decode_record_header(&[0u8; 8]).unwrap();
        assert!(header.is_empty());
    }

    #[test]
    fn single_byte_flip_breaks_the_checksum() {
        let record = LogRecord {
            key: b"stable".to_vec(),
            value: b"value".to_vec(),
            kind: RecordKind::Normal,
        };
        let (buf, _) = record.encode();
        let (_, header_size) = decode_record_header(&buf).unwrap();

        for i in CRC_SIZE..buf.len() {
            let mut corrupted = buf.clone();
            corrupted[i] ^= 0x01;
            let (header, _) = decode_record_header(&corrupted).unwrap();
            let crc = record_crc(
                &corrupted[CRC_SIZE..header_size],
                &corrupted[header_size..header_size + 6],
                &corrupted[header_size + 6..],
            );
            assert_ne!(crc, header.crc, "flip at byte {i} went undetected");
        }
    }

    proptest! {
        #[test]
        fn encode_decode_round_trip(
            key in prop::collection::vec(any::<u8>(), 1..64),
            value in prop::collection::vec(any::<u8>(), 0..256),
            kind_byte in 0u8..=4,
        ) {
            let record = LogRecord {
                key,
                value,
                kind: RecordKind::from_u8(kind_byte).unwrap(),
            };
            let (buf, size) = record.encode();
            prop_assert_eq!(buf.len() as u64, size);

            let (header, header_size) = decode_record_header(&buf).unwrap();
            prop_assert_eq!(header.kind, kind_byte);
            prop_assert_eq!(header.key_size as usize, record.key.len());
            prop_assert_eq!(header.value_size as usize, record.value.len());

            let key_end = header_size + record.key.len();
            let crc = record_crc(&buf[CRC_SIZE..header_size], &buf[header_size..key_end], &buf[key_end..]);
            prop_assert_eq!(crc, header.crc);
        }

        #[test]
        fn key_seq_round_trip(
            key in prop::collection::vec(any::<u8>(), 0..32),
            seq in any::<u64>(),
        ) {
            let encoded = key_with_seq(&key, seq);
            prop_assert_eq!(parse_record_key(&encoded), (key, seq));
        }
    }
}
