//! Merge: offline reclamation of dead records.
//!
//! A merge rewrites every live record of the frozen segments into a
//! sibling directory (`<dir>-merge`) through a scratch engine, emits a
//! hint record per live key, and finally drops a `merge-finished` marker
//! carrying the id of the first segment that did not participate. The
//! sibling is promoted into the primary directory at the next open;
//! without the marker it is discarded on sight, so a crash anywhere in
//! the rewrite costs nothing.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use galena_io::IoKind;
use tracing::{debug, info, warn};

use crate::data_file::{
    DataFile, MERGE_FINISHED_FILE_NAME, SEQ_ID_FILE_NAME, data_file_path,
};
use crate::db::{Database, LOCK_FILE_NAME};
use crate::errors::{Error, Result};
use crate::options::IndexKind;
use crate::record::{LogRecord, NON_BATCH_SEQ, RecordKind, key_with_seq, parse_record_key};
use crate::util;

/// Suffix of the sibling directory a merge writes into.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key stored in the merge-finished record.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Sibling directory for `dir_path`.
pub(crate) fn merge_path(dir_path: &Path) -> PathBuf {
    let parent = dir_path.parent().unwrap_or_else(|| Path::new("."));
    let mut base = dir_path
        .file_name()
        .map_or_else(OsString::new, OsString::from);
    base.push(MERGE_DIR_SUFFIX);
    parent.join(base)
}

/// Reads the cutoff id out of the merge-finished marker in `dir_path`.
pub(crate) fn read_non_merge_file_id(dir_path: &Path) -> Result<u32> {
    let file = DataFile::merge_finished_file(dir_path)?;
    let read = file.read_record(0)?;
    std::str::from_utf8(&read.record.value)
        .ok()
        .and_then(|text| text.parse::<u32>().ok())
        .ok_or(Error::DataDirectoryCorrupted)
}

/// Promotes a completed merge sibling into `dir_path`, if one exists.
///
/// Returns whether a promotion happened. The sibling directory is
/// removed either way; promotion is idempotent, so a crash between the
/// renames is repaired by the next open.
pub(crate) fn load_merge_files(dir_path: &Path) -> Result<bool> {
    let merge_dir = merge_path(dir_path);
    if !merge_dir.is_dir() {
        return Ok(false);
    }
    let promoted = promote_merge_files(dir_path, &merge_dir);
    if merge_dir.is_dir() {
        fs::remove_dir_all(&merge_dir)?;
    }
    promoted
}

fn promote_merge_files(dir_path: &Path, merge_dir: &Path) -> Result<bool> {
    let mut merge_finished = false;
    let mut file_names: Vec<OsString> = Vec::new();
    for entry in fs::read_dir(merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str() == Some(MERGE_FINISHED_FILE_NAME) {
            merge_finished = true;
        }
        file_names.push(name);
    }
    if !merge_finished {
        warn!(path = %merge_dir.display(), "discarding incomplete merge sibling");
        return Ok(false);
    }

    let cutoff = read_non_merge_file_id(merge_dir)?;

    // every segment below the cutoff was rewritten into the sibling
    for file_id in 0..cutoff {
        let path = data_file_path(dir_path, file_id);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }

    // move the rewritten files in; instance-local files stay behind
    for name in file_names {
        let name_str = name.to_str();
        if name_str == Some(LOCK_FILE_NAME) || name_str == Some(SEQ_ID_FILE_NAME) {
            continue;
        }
        fs::rename(merge_dir.join(&name), dir_path.join(&name))?;
    }
    info!(cutoff, "promoted merge sibling");
    Ok(true)
}

impl Database {
    /// Rewrites all frozen segments, keeping only live records.
    ///
    /// Runs offline with respect to the directory: writes continue into a
    /// freshly rotated active segment while the merge copies the frozen
    /// ones. The result takes effect at the next open.
    pub fn merge(&self) -> Result<()> {
        let Some(_merge_guard) = self.merge_lock.try_lock() else {
            return Err(Error::MergeInProgress);
        };
        // nothing written yet, nothing to reclaim
        if self.active_file.read().is_none() {
            return Ok(());
        }

        let total_size = util::dir_disk_size(&self.options.dir_path)?;
        let reclaimable = self.reclaimable.load(Ordering::SeqCst);
        if total_size == 0
            || (reclaimable as f32 / total_size as f32) < self.options.merge_ratio
        {
            return Err(Error::MergeThresholdNotReached);
        }
        let live_size = total_size.saturating_sub(reclaimable);
        if util::available_disk_size(&self.options.dir_path)? <= live_size {
            return Err(Error::InsufficientDiskSpace);
        }

        // freeze the log: rotate so concurrent writes land past the cutoff
        let non_merge_file_id;
        let merge_ids: Vec<u32>;
        {
            let mut active = self.active_file.write();
            let Some(retired) = active.take() else {
                return Ok(());
            };
            if let Err(e) = retired.sync() {
                *active = Some(retired);
                return Err(e);
            }
            let retired_id = retired.file_id();
            non_merge_file_id = retired_id + 1;
            match DataFile::open(&self.options.dir_path, non_merge_file_id, IoKind::Standard) {
                Ok(fresh) => {
                    let mut older = self.older_files.write();
                    older.insert(retired_id, retired);
                    *active = Some(fresh);
                    let mut ids: Vec<u32> = older.keys().copied().collect();
                    ids.sort_unstable();
                    merge_ids = ids;
                }
                Err(e) => {
                    *active = Some(retired);
                    return Err(e);
                }
            }
        }

        // a leftover sibling is a failed merge; start clean
        let merge_dir = merge_path(&self.options.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let mut merge_options = self.options.clone();
        merge_options.dir_path = merge_dir.clone();
        merge_options.sync_writes = false;
        merge_options.mmap_at_startup = false;
        // the scratch engine's directory is never consulted
        merge_options.index_kind = IndexKind::BTree;
        let merge_db = Database::open(merge_options)?;

        let mut hint_file = DataFile::hint_file(&merge_dir)?;
        let mut live_records = 0usize;

        for file_id in merge_ids {
            let file = DataFile::open(&self.options.dir_path, file_id, IoKind::Standard)?;
            let mut offset = 0u64;
            loop {
                let read = match file.read_record(offset) {
                    Ok(read) => read,
                    Err(Error::EndOfDataFile) => break,
                    Err(e) => return Err(e),
                };
                let size = read.size;
                let (real_key, _) = parse_record_key(&read.record.key);

                // a record is live iff the directory still points at it
                let live = self
                    .index
                    .get(&real_key)
                    .is_some_and(|pos| pos.file_id == file_id && pos.offset == offset as i64);
                if live {
                    let rewritten = LogRecord {
                        key: key_with_seq(&real_key, NON_BATCH_SEQ),
                        value: read.record.value,
                        kind: read.record.kind,
                    };
                    let new_pos = merge_db.append_log_record(&rewritten)?;
                    hint_file.write_hint_record(&real_key, new_pos)?;
                    live_records += 1;
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_db.sync()?;

        // the marker flips the sibling from garbage to promotable
        let mut finished_file = DataFile::merge_finished_file(&merge_dir)?;
        let marker = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            kind: RecordKind::Normal,
        };
        let (encoded, _) = marker.encode();
        finished_file.append(&encoded)?;
        finished_file.sync()?;

        merge_db.close()?;
        debug!(live_records, cutoff = non_merge_file_id, "merge rewrite complete");
        Ok(())
    }
}
