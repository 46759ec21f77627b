//! Numbered segment files and the auxiliary record files.
//!
//! Segments are named `NNNNNNNNNN.data` (ten-digit zero-padded id) and
//! only ever appended to; a segment becomes immutable the moment it stops
//! being the active one. The hint, merge-finished and seq-id files reuse
//! the same record framing with a fixed name and file id 0.

use std::path::{Path, PathBuf};

use galena_io::{IoBackend, IoKind, new_io_backend};
use galena_types::RecordPosition;

use crate::errors::{Error, Result};
use crate::record::{
    CRC_SIZE, LogRecord, MAX_RECORD_DATA_SIZE, ReadRecord, RecordKind, decode_record_header,
    max_record_header_size, record_crc,
};

/// Suffix of every segment file.
pub(crate) const DATA_FILE_SUFFIX: &str = ".data";

/// Directory entries emitted by merge.
pub(crate) const HINT_FILE_NAME: &str = "hint-index";

/// Marker holding the merge cutoff id.
pub(crate) const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Last issued batch sequence, written at close.
pub(crate) const SEQ_ID_FILE_NAME: &str = "seq-id";

/// Path of segment `file_id` inside `dir_path`.
pub(crate) fn data_file_path(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:010}{DATA_FILE_SUFFIX}"))
}

/// One log file: a numbered segment or an auxiliary record file.
pub(crate) struct DataFile {
    file_id: u32,
    write_offset: u64,
    io: Box<dyn IoBackend>,
}

impl DataFile {
    /// Opens (or creates) segment `file_id` with the requested backend.
    pub(crate) fn open(dir_path: &Path, file_id: u32, io_kind: IoKind) -> Result<Self> {
        let io = new_io_backend(&data_file_path(dir_path, file_id), io_kind)?;
        Ok(Self {
            file_id,
            write_offset: 0,
            io,
        })
    }

    /// Opens the hint file inside `dir_path`.
    pub(crate) fn hint_file(dir_path: &Path) -> Result<Self> {
        Self::auxiliary(dir_path, HINT_FILE_NAME)
    }

    /// Opens the merge-finished marker inside `dir_path`.
    pub(crate) fn merge_finished_file(dir_path: &Path) -> Result<Self> {
        Self::auxiliary(dir_path, MERGE_FINISHED_FILE_NAME)
    }

    /// Opens the seq-id file inside `dir_path`.
    pub(crate) fn seq_id_file(dir_path: &Path) -> Result<Self> {
        Self::auxiliary(dir_path, SEQ_ID_FILE_NAME)
    }

    fn auxiliary(dir_path: &Path, name: &str) -> Result<Self> {
        let io = new_io_backend(&dir_path.join(name), IoKind::Standard)?;
        Ok(Self {
            file_id: 0,
            write_offset: 0,
            io,
        })
    }

    pub(crate) fn file_id(&self) -> u32 {
        self.file_id
    }

    pub(crate) fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub(crate) fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    pub(crate) fn file_size(&self) -> Result<u64> {
        Ok(self.io.size()?)
    }

    /// Appends `buf` in full and advances the write offset.
    pub(crate) fn append(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.write(buf)?;
        self.write_offset += n as u64;
        Ok(())
    }

    /// Reads and verifies one record starting at `offset`.
    ///
    /// `EndOfDataFile` marks both the clean end of the segment and a torn
    /// tail (a record whose bytes stop short); `InvalidRecordCrc` marks a
    /// record that is fully present but does not checksum.
    pub(crate) fn read_record(&self, offset: u64) -> Result<ReadRecord> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Err(Error::EndOfDataFile);
        }

        // clamp the header read to the end of the file
        let mut header_len = max_record_header_size() as u64;
        if offset + header_len > file_size {
            header_len = file_size - offset;
        }
        let mut header_buf = vec![0u8; header_len as usize];
        self.read_exact(&mut header_buf, offset)?;

        let Some((header, header_size)) = decode_record_header(&header_buf) else {
            return Err(Error::EndOfDataFile);
        };
        if header.is_empty() {
            return Err(Error::EndOfDataFile);
        }
        if header.key_size < 0
            || header.value_size < 0
            || header.key_size as usize > MAX_RECORD_DATA_SIZE
            || header.value_size as usize > MAX_RECORD_DATA_SIZE
        {
            return Err(Error::InvalidRecordCrc);
        }

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let mut kv_buf = vec![0u8; key_size + value_size];
        if !kv_buf.is_empty() {
            self.read_exact(&mut kv_buf, offset + header_size as u64)?;
        }

        let crc = record_crc(
            &header_buf[CRC_SIZE..header_size],
            &kv_buf[..key_size],
            &kv_buf[key_size..],
        );
        if crc != header.crc {
            return Err(Error::InvalidRecordCrc);
        }
        let kind = RecordKind::from_u8(header.kind).ok_or(Error::InvalidRecordCrc)?;

        let value = kv_buf.split_off(key_size);
        Ok(ReadRecord {
            record: LogRecord {
                key: kv_buf,
                value,
                kind,
            },
            size: (header_size + key_size + value_size) as u64,
        })
    }

    /// Appends a hint record mapping `key` to `pos`.
    pub(crate) fn write_hint_record(&mut self, key: &[u8], pos: RecordPosition) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: pos.encode(),
            kind: RecordKind::Hint,
        };
        let (encoded, _) = record.encode();
        self.append(&encoded)
    }

    pub(crate) fn sync(&self) -> Result<()> {
        Ok(self.io.sync()?)
    }

    pub(crate) fn close(&self) -> Result<()> {
        Ok(self.io.close()?)
    }

    /// Swaps the backend, e.g. from the startup mapping back to buffered
    /// I/O. Only meaningful for numbered segments.
    pub(crate) fn rebind_io(&mut self, dir_path: &Path, io_kind: IoKind) -> Result<()> {
        self.io = new_io_backend(&data_file_path(dir_path, self.file_id), io_kind)?;
        Ok(())
    }

    fn read_exact(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let n = self.io.read(buf, offset)?;
        if n < buf.len() {
            return Err(Error::EndOfDataFile);
        }
        Ok(())
    }
}
