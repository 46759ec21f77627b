//! The database engine.
//!
//! A [`Database`] owns one append-only active segment, the immutable
//! older segments, the key directory, the batch sequence and the advisory
//! directory lock. Reads resolve a position through the directory and
//! perform a single positional read; writes append to the active segment
//! and then update the directory, in that order, so a position observed
//! through the directory always refers to bytes already on disk.
//!
//! # Startup
//!
//! Opening a directory promotes any completed merge sibling, scans the
//! numbered segments in ascending id order and rebuilds the directory —
//! from the hint file first when one exists, then from the segment tail.
//! The disk-backed directory skips the replay entirely. Committed batches
//! replay atomically: records of a sequence are buffered until the finish
//! marker is seen and discarded when the scan ends without one.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use fs2::FileExt;
use galena_index::{IndexKind, Indexer, new_indexer};
use galena_io::IoKind;
use galena_types::RecordPosition;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::data_file::{DATA_FILE_SUFFIX, DataFile, MERGE_FINISHED_FILE_NAME, SEQ_ID_FILE_NAME};
use crate::errors::{Error, Result};
use crate::merge;
use crate::options::Options;
use crate::record::{
    LogRecord, MAX_RECORD_DATA_SIZE, NON_BATCH_SEQ, RecordKind, key_with_seq, parse_record_key,
};
use crate::util;

/// Advisory lock file, held exclusively for the life of the handle.
pub(crate) const LOCK_FILE_NAME: &str = "bitcask.lock";

/// Key stored in the seq-id record.
const SEQ_ID_KEY: &[u8] = b"seq.id";

/// Id given to the first segment of a fresh directory.
const INITIAL_FILE_ID: u32 = 0;

/// A point-in-time summary of the engine, from [`Database::stat`].
#[derive(Debug, Clone)]
pub struct Stat {
    /// Live keys in the directory.
    pub key_count: usize,
    /// Segment files, active included.
    pub file_count: usize,
    /// Approximate bytes a merge would reclaim.
    pub reclaimable_bytes: u64,
    /// Bytes the data directory occupies on disk.
    pub disk_usage: u64,
}

/// An embedded, single-writer, crash-safe key-value store.
///
/// All operations take `&self`; the engine synchronizes internally and a
/// handle can be shared across threads. Call [`Database::close`] when
/// done — it persists the batch sequence and releases the directory lock.
pub struct Database {
    pub(crate) options: Options,
    pub(crate) active_file: RwLock<Option<DataFile>>,
    pub(crate) older_files: RwLock<HashMap<u32, DataFile>>,
    pub(crate) index: Box<dyn Indexer>,
    /// Last issued batch sequence.
    pub(crate) seq: AtomicU64,
    /// Serializes batch commits.
    pub(crate) commit_lock: Mutex<()>,
    /// Held for the whole of a merge; try-locked to detect overlap.
    pub(crate) merge_lock: Mutex<()>,
    /// Set when the disk-backed directory found no seq-id file to restore.
    seq_file_missing: bool,
    /// The directory was empty (or absent) when this handle opened it.
    is_initial: bool,
    lock_file: File,
    /// Unsynced bytes, for the `bytes_per_sync` accumulator.
    bytes_since_sync: AtomicU64,
    /// Approximate bytes occupied by overwritten and tombstoned records.
    pub(crate) reclaimable: AtomicU64,
}

impl Database {
    /// Opens the engine rooted at `options.dir_path`.
    pub fn open(options: Options) -> Result<Database> {
        check_options(&options)?;

        let dir_path = options.dir_path.clone();
        let mut is_initial = false;
        if !dir_path.is_dir() {
            is_initial = true;
            fs::create_dir_all(&dir_path)?;
        } else if fs::read_dir(&dir_path)?.next().is_none() {
            is_initial = true;
        }

        let lock_file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir_path.join(LOCK_FILE_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(Error::DatabaseInUse);
        }

        let promoted = merge::load_merge_files(&dir_path)?;

        let io_kind = if options.mmap_at_startup {
            IoKind::MemoryMap
        } else {
            IoKind::Standard
        };
        let mut data_files = load_data_files(&dir_path, io_kind)?;
        let file_ids: Vec<u32> = data_files.iter().map(DataFile::file_id).collect();

        let active = data_files.pop();
        let mut older_files = HashMap::new();
        for file in data_files {
            older_files.insert(file.file_id(), file);
        }

        let index = new_indexer(options.index_kind, &dir_path)?;
        let index_kind = options.index_kind;

        let mut db = Database {
            options,
            active_file: RwLock::new(active),
            older_files: RwLock::new(older_files),
            index,
            seq: AtomicU64::new(NON_BATCH_SEQ),
            commit_lock: Mutex::new(()),
            merge_lock: Mutex::new(()),
            seq_file_missing: false,
            is_initial,
            lock_file,
            bytes_since_sync: AtomicU64::new(0),
            reclaimable: AtomicU64::new(0),
        };

        if index_kind == IndexKind::BPlusTree {
            match db.load_seq_id()? {
                Some(seq) => db.seq.store(seq, Ordering::SeqCst),
                None => db.seq_file_missing = true,
            }
            if promoted {
                // a promotion moved records under the persisted directory;
                // replay the hint file and the unmerged tail over it
                db.load_index_from_hint_file()?;
                let max_seq = db.load_index_from_data_files(&file_ids)?;
                if max_seq > db.seq.load(Ordering::SeqCst) {
                    db.seq.store(max_seq, Ordering::SeqCst);
                }
            } else if let Some(active) = db.active_file.write().as_mut() {
                let size = active.file_size()?;
                active.set_write_offset(size);
            }
        } else {
            db.load_index_from_hint_file()?;
            let max_seq = db.load_index_from_data_files(&file_ids)?;
            if max_seq > NON_BATCH_SEQ {
                db.seq.store(max_seq, Ordering::SeqCst);
            }
        }

        if db.options.mmap_at_startup {
            db.reset_io_kind()?;
        }

        info!(
            path = %db.options.dir_path.display(),
            segments = file_ids.len(),
            keys = db.index.len(),
            "opened database"
        );
        Ok(db)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord {
            key: key_with_seq(&key, NON_BATCH_SEQ),
            value: value.to_vec(),
            kind: RecordKind::Normal,
        };
        let pos = self.append_log_record(&record)?;

        if let Some(old) = self.index.put(key.to_vec(), pos) {
            self.reclaimable
                .fetch_add(u64::from(old.size), Ordering::SeqCst);
        }
        Ok(())
    }

    /// Fetches the live value for `key`.
    pub fn get(&self, key: Bytes) -> Result<Bytes> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(&key).ok_or(Error::KeyNotFound)?;
        self.get_value_by_position(pos)
    }

    /// Removes `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(&key).is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: key_with_seq(&key, NON_BATCH_SEQ),
            value: Vec::new(),
            kind: RecordKind::Deleted,
        };
        let pos = self.append_log_record(&record)?;
        // the tombstone itself is dead weight from the moment it lands
        self.reclaimable
            .fetch_add(u64::from(pos.size), Ordering::SeqCst);

        match self.index.delete(&key) {
            Some(old) => {
                self.reclaimable
                    .fetch_add(u64::from(old.size), Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::IndexUpdateFailed),
        }
    }

    /// Forces the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        let active = self.active_file.read();
        match active.as_ref() {
            Some(file) => file.sync(),
            None => Ok(()),
        }
    }

    /// Flushes, persists the batch sequence, closes every segment and
    /// releases the directory lock.
    pub fn close(&self) -> Result<()> {
        let result = self.close_files();
        // a process that cannot release its own directory lock must not
        // keep running with the directory held
        FileExt::unlock(&self.lock_file).expect("release directory lock");
        result
    }

    fn close_files(&self) -> Result<()> {
        let active = self.active_file.write();
        if active.is_none() {
            return Ok(());
        }
        self.index.close()?;

        // persist the last issued sequence for the next open
        let seq_path = self.options.dir_path.join(SEQ_ID_FILE_NAME);
        if seq_path.is_file() {
            fs::remove_file(&seq_path)?;
        }
        let mut seq_file = DataFile::seq_id_file(&self.options.dir_path)?;
        let record = LogRecord {
            key: SEQ_ID_KEY.to_vec(),
            value: self.seq.load(Ordering::SeqCst).to_string().into_bytes(),
            kind: RecordKind::SeqId,
        };
        let (encoded, _) = record.encode();
        seq_file.append(&encoded)?;
        seq_file.sync()?;

        if let Some(file) = active.as_ref() {
            file.sync()?;
            file.close()?;
        }
        for file in self.older_files.read().values() {
            file.close()?;
        }
        Ok(())
    }

    /// Every live key, in lexicographic order.
    pub fn list_keys(&self) -> Vec<Bytes> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(iter.len());
        while let Some((key, _)) = iter.next() {
            keys.push(Bytes::copy_from_slice(key));
        }
        keys
    }

    /// Calls `visit` for every live pair in key order until it returns
    /// `false`.
    pub fn fold<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Bytes, Bytes) -> bool,
    {
        let mut iter = self.index.iterator(false);
        while let Some((key, pos)) = iter.next() {
            let value = self.get_value_by_position(pos)?;
            if !visit(Bytes::copy_from_slice(key), value) {
                break;
            }
        }
        Ok(())
    }

    /// Reports key count, segment count, reclaimable bytes and disk usage.
    pub fn stat(&self) -> Result<Stat> {
        let active = self.active_file.read();
        let older = self.older_files.read();
        Ok(Stat {
            key_count: self.index.len(),
            file_count: older.len() + usize::from(active.is_some()),
            reclaimable_bytes: self.reclaimable.load(Ordering::SeqCst),
            disk_usage: util::dir_disk_size(&self.options.dir_path)?,
        })
    }

    /// Copies the data directory to `dest`, leaving the advisory lock
    /// behind. Backing up onto the source directory is a no-op.
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        util::copy_dir(&self.options.dir_path, dest.as_ref(), &[LOCK_FILE_NAME])
    }

    /// Resolves `pos` to its record's value.
    pub(crate) fn get_value_by_position(&self, pos: RecordPosition) -> Result<Bytes> {
        let active = self.active_file.read();
        let older = self.older_files.read();
        let record = match active.as_ref() {
            Some(file) if file.file_id() == pos.file_id => {
                file.read_record(pos.offset as u64)?.record
            }
            _ => {
                older
                    .get(&pos.file_id)
                    .ok_or(Error::DataFileNotFound)?
                    .read_record(pos.offset as u64)?
                    .record
            }
        };
        // the directory never points at a tombstone under normal
        // operation; answer as if the key were absent
        if record.kind == RecordKind::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(Bytes::from(record.value))
    }

    /// Appends one record under the active-file write lock.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<RecordPosition> {
        let mut active = self.active_file.write();
        self.append_record_locked(&mut active, record)
    }

    /// Append body; the caller holds the active-file write lock.
    pub(crate) fn append_record_locked(
        &self,
        active: &mut Option<DataFile>,
        record: &LogRecord,
    ) -> Result<RecordPosition> {
        if record.key.len() > MAX_RECORD_DATA_SIZE || record.value.len() > MAX_RECORD_DATA_SIZE {
            return Err(Error::RecordTooLarge);
        }

        if active.is_none() {
            *active = Some(DataFile::open(
                &self.options.dir_path,
                INITIAL_FILE_ID,
                IoKind::Standard,
            )?);
        }

        let (encoded, size) = record.encode();

        let mut rotate = false;
        {
            let file = active.as_mut().expect("active segment was just ensured");
            if file.write_offset() + size > self.options.max_file_size {
                file.sync()?;
                rotate = true;
            }
        }
        if rotate {
            let retired = active.take().expect("active segment was just ensured");
            let next_id = retired.file_id() + 1;
            match DataFile::open(&self.options.dir_path, next_id, IoKind::Standard) {
                Ok(fresh) => {
                    self.older_files.write().insert(retired.file_id(), retired);
                    *active = Some(fresh);
                }
                Err(e) => {
                    // keep the full segment writable rather than losing it
                    *active = Some(retired);
                    return Err(e);
                }
            }
        }

        let file = active.as_mut().expect("active segment was just ensured");
        let write_offset = file.write_offset();
        file.append(&encoded)?;

        let unsynced = self.bytes_since_sync.fetch_add(size, Ordering::SeqCst) + size;
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0 && unsynced >= self.options.bytes_per_sync);
        if need_sync {
            file.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        Ok(RecordPosition::new(
            file.file_id(),
            write_offset as i64,
            size as u32,
        ))
    }

    /// Reads (and consumes) the seq-id file, if present.
    fn load_seq_id(&self) -> Result<Option<u64>> {
        let path = self.options.dir_path.join(SEQ_ID_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let file = DataFile::seq_id_file(&self.options.dir_path)?;
        let read = file.read_record(0)?;
        let seq = std::str::from_utf8(&read.record.value)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or(Error::DataDirectoryCorrupted)?;
        // consumed: a stale sequence must never be restored twice
        fs::remove_file(&path)?;
        Ok(Some(seq))
    }

    /// Replays the hint file into the directory, if one exists.
    pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
        let path = self.options.dir_path.join(crate::data_file::HINT_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }

        let hint_file = DataFile::hint_file(&self.options.dir_path)?;
        let mut offset = 0u64;
        let mut entries = 0usize;
        loop {
            let read = match hint_file.read_record(offset) {
                Ok(read) => read,
                Err(Error::EndOfDataFile) => break,
                Err(e) => return Err(e),
            };
            let pos = RecordPosition::decode(&read.record.value)
                .ok_or(Error::DataDirectoryCorrupted)?;
            self.index.put(read.record.key, pos);
            entries += 1;
            offset += read.size;
        }
        debug!(entries, "replayed hint file");
        Ok(())
    }

    /// Replays every segment at or past the merge cutoff, in id order.
    ///
    /// Returns the largest batch sequence seen.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<u64> {
        let mut max_seq = NON_BATCH_SEQ;
        if file_ids.is_empty() {
            return Ok(max_seq);
        }

        // records below the cutoff were rewritten by the promoted merge
        let mut has_merged = false;
        let mut cutoff = 0u32;
        if self
            .options
            .dir_path
            .join(MERGE_FINISHED_FILE_NAME)
            .is_file()
        {
            cutoff = merge::read_non_merge_file_id(&self.options.dir_path)?;
            has_merged = true;
        }

        // committed batches apply on their finish marker; the rest of a
        // sequence stays buffered here and dies with the scan
        let mut pending: HashMap<u64, Vec<(LogRecord, RecordPosition)>> = HashMap::new();

        let mut active = self.active_file.write();
        let older = self.older_files.read();
        let mut active_offset = 0u64;

        for file_id in file_ids {
            if has_merged && *file_id < cutoff {
                continue;
            }
            let is_active = active.as_ref().is_some_and(|f| f.file_id() == *file_id);
            let file: &DataFile = if is_active {
                active.as_ref().expect("active matched above")
            } else {
                older.get(file_id).ok_or(Error::DataFileNotFound)?
            };

            let mut offset = 0u64;
            loop {
                let read = match file.read_record(offset) {
                    Ok(read) => read,
                    Err(Error::EndOfDataFile) => break,
                    Err(e) => return Err(e),
                };
                let size = read.size;
                let pos = RecordPosition::new(*file_id, offset as i64, size as u32);
                let (real_key, seq) = parse_record_key(&read.record.key);

                if seq == NON_BATCH_SEQ {
                    self.update_index_on_load(real_key, read.record.kind, pos);
                } else if read.record.kind == RecordKind::TxnFinished {
                    if let Some(bucket) = pending.remove(&seq) {
                        for (record, pos) in bucket {
                            self.update_index_on_load(record.key, record.kind, pos);
                        }
                    }
                } else {
                    let mut record = read.record;
                    record.key = real_key;
                    pending.entry(seq).or_default().push((record, pos));
                }

                if seq > max_seq {
                    max_seq = seq;
                }
                offset += size;
            }

            if is_active {
                active_offset = offset;
            }
        }

        if !pending.is_empty() {
            warn!(
                sequences = pending.len(),
                "discarded records of uncommitted batches"
            );
        }
        if let Some(file) = active.as_mut() {
            file.set_write_offset(active_offset);
        }
        Ok(max_seq)
    }

    /// Applies one replayed record to the directory.
    fn update_index_on_load(&self, key: Vec<u8>, kind: RecordKind, pos: RecordPosition) {
        match kind {
            RecordKind::Normal => {
                if let Some(old) = self.index.put(key, pos) {
                    self.reclaimable
                        .fetch_add(u64::from(old.size), Ordering::SeqCst);
                }
            }
            RecordKind::Deleted => {
                let mut reclaimed = u64::from(pos.size);
                if let Some(old) = self.index.delete(&key) {
                    reclaimed += u64::from(old.size);
                }
                self.reclaimable.fetch_add(reclaimed, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    /// Rebinds every segment to buffered I/O after an mmap-backed replay.
    fn reset_io_kind(&self) -> Result<()> {
        let mut active = self.active_file.write();
        if let Some(file) = active.as_mut() {
            file.rebind_io(&self.options.dir_path, IoKind::Standard)?;
        }
        for file in self.older_files.write().values_mut() {
            file.rebind_io(&self.options.dir_path, IoKind::Standard)?;
        }
        Ok(())
    }

    /// Whether batches may hand out sequences on this handle.
    pub(crate) fn batch_seq_usable(&self) -> bool {
        self.options.index_kind != IndexKind::BPlusTree || !self.seq_file_missing || self.is_initial
    }
}

/// Scans `dir_path` for segments and opens them in ascending id order.
fn load_data_files(dir_path: &Path, io_kind: IoKind) -> Result<Vec<DataFile>> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let file_id = stem
                .parse::<u32>()
                .map_err(|_| Error::DataDirectoryCorrupted)?;
            file_ids.push(file_id);
        }
    }
    file_ids.sort_unstable();

    let mut files = Vec::with_capacity(file_ids.len());
    for file_id in file_ids {
        files.push(DataFile::open(dir_path, file_id, io_kind)?);
    }
    Ok(files)
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::InvalidOptions("dir_path must not be empty"));
    }
    if options.max_file_size == 0 {
        return Err(Error::InvalidOptions("max_file_size must be positive"));
    }
    if !(0.0..=1.0).contains(&options.merge_ratio) {
        return Err(Error::InvalidOptions("merge_ratio must be within [0, 1]"));
    }
    Ok(())
}

/// Count of `.data` files currently in `dir_path`; test support.
#[cfg(test)]
pub(crate) fn count_data_files(dir_path: &Path) -> usize {
    fs::read_dir(dir_path)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| n.ends_with(DATA_FILE_SUFFIX))
                })
                .count()
        })
        .unwrap_or(0)
}
