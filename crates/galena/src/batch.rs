//! Atomic write batches.
//!
//! A batch stages puts and deletes in memory, keyed by the real key, and
//! commits them as one unit: every staged record is appended with a fresh
//! sequence number, followed by a finish marker for that sequence. The
//! startup replay only applies records whose finish marker made it to
//! disk, so a crash mid-commit leaves no trace of the batch.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use galena_types::RecordPosition;
use parking_lot::Mutex;

use crate::db::Database;
use crate::errors::{Error, Result};
use crate::options::WriteBatchOptions;
use crate::record::{LogRecord, RecordKind, key_with_seq};

/// Real key of the per-sequence finish marker.
pub(crate) const TXN_FIN_KEY: &[u8] = b"$txn_fin$";

/// A buffered group of mutations committed atomically.
///
/// Later stagings for the same key supersede earlier ones. Nothing is
/// visible to readers until [`WriteBatch::commit`] returns.
pub struct WriteBatch<'a> {
    db: &'a Database,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
    options: WriteBatchOptions,
}

impl Database {
    /// Creates an empty batch over this database.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if !self.batch_seq_usable() {
            return Err(Error::BatchSeqNotAvailable);
        }
        Ok(WriteBatch {
            db: self,
            pending: Mutex::new(HashMap::new()),
            options,
        })
    }
}

impl WriteBatch<'_> {
    /// Stages a put.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            kind: RecordKind::Normal,
        };
        self.pending.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stages a delete.
    ///
    /// Deleting a key that is neither live nor staged is a no-op; a
    /// staged put for the key is simply withdrawn.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.db.index.get(&key).is_none() {
            pending.remove(&key[..]);
            return Ok(());
        }
        let record = LogRecord {
            key: key.to_vec(),
            value: Vec::new(),
            kind: RecordKind::Deleted,
        };
        pending.insert(key.to_vec(), record);
        Ok(())
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Appends every staged record under one sequence, terminated by the
    /// finish marker, then applies the batch to the directory.
    ///
    /// An oversize batch fails before anything is appended and leaves the
    /// directory untouched.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size as usize {
            return Err(Error::ExceedMaxBatchSize);
        }

        // one committer at a time; the active-file lock below keeps the
        // sequence's records contiguous on disk
        let _commit_guard = self.db.commit_lock.lock();
        let seq = self.db.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, RecordPosition> =
            HashMap::with_capacity(pending.len());
        {
            let mut active = self.db.active_file.write();
            for (key, staged) in pending.iter() {
                let record = LogRecord {
                    key: key_with_seq(key, seq),
                    value: staged.value.clone(),
                    kind: staged.kind,
                };
                let pos = self.db.append_record_locked(&mut active, &record)?;
                positions.insert(key.clone(), pos);
            }

            let finisher = LogRecord {
                key: key_with_seq(TXN_FIN_KEY, seq),
                value: Vec::new(),
                kind: RecordKind::TxnFinished,
            };
            self.db.append_record_locked(&mut active, &finisher)?;

            if self.options.sync_writes {
                if let Some(file) = active.as_ref() {
                    file.sync()?;
                }
            }
        }

        // the marker is durable; the batch may now become visible
        for (key, staged) in pending.drain() {
            match staged.kind {
                RecordKind::Deleted => {
                    if let Some(old) = self.db.index.delete(&key) {
                        self.db
                            .reclaimable
                            .fetch_add(u64::from(old.size), Ordering::SeqCst);
                    }
                }
                _ => {
                    let pos = positions
                        .get(&key)
                        .copied()
                        .ok_or(Error::IndexUpdateFailed)?;
                    if let Some(old) = self.db.index.put(key, pos) {
                        self.db
                            .reclaimable
                            .fetch_add(u64::from(old.size), Ordering::SeqCst);
                    }
                }
            }
        }
        Ok(())
    }
}
