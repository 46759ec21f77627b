//! Disk-backed B+ tree directory.
//!
//! Backed by a single embedded [`jammdb`] store with one named bucket.
//! Unlike the in-memory directories, this one survives restarts, which
//! lets the engine skip the startup replay entirely; the price is a
//! write transaction per mutation.

use std::path::Path;

use galena_types::RecordPosition;
use jammdb::DB;

use crate::{IndexError, IndexIterator, Indexer};

/// File name of the directory store inside the data directory.
const INDEX_FILE_NAME: &str = "bplustree-index";

/// The one bucket holding all key positions.
const BUCKET_NAME: &str = "key-directory";

/// Key directory persisted in an embedded B+ tree store.
///
/// Positions are stored in the wire format of
/// [`RecordPosition::encode`]. Reads run in read-only transactions;
/// every mutation commits its own read–write transaction, reading the
/// displaced value inside that same transaction before overwriting.
///
/// Internal store failures after a successful open are unrecoverable
/// directory corruption and abort the process, mirroring the upstream
/// engines this design follows.
pub struct BPlusTreeIndex {
    store: DB,
}

impl BPlusTreeIndex {
    /// Opens (or creates) the directory store inside `dir_path`.
    pub fn new(dir_path: &Path) -> Result<Self, IndexError> {
        let store = DB::open(dir_path.join(INDEX_FILE_NAME))?;
        let tx = store.tx(true)?;
        tx.get_or_create_bucket(BUCKET_NAME)?;
        tx.commit()?;
        Ok(Self { store })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition> {
        let tx = self
            .store
            .tx(true)
            .expect("begin rw transaction on directory store");
        let bucket = tx
            .get_bucket(BUCKET_NAME)
            .expect("directory bucket exists");
        let displaced = bucket
            .get_kv(&key)
            .and_then(|kv| RecordPosition::decode(kv.value()));
        bucket
            .put(key, pos.encode())
            .expect("write position into directory store");
        tx.commit().expect("commit directory store transaction");
        displaced
    }

    fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        let tx = self
            .store
            .tx(false)
            .expect("begin ro transaction on directory store");
        let bucket = tx
            .get_bucket(BUCKET_NAME)
            .expect("directory bucket exists");
        bucket
            .get_kv(key)
            .and_then(|kv| RecordPosition::decode(kv.value()))
    }

    fn delete(&self, key: &[u8]) -> Option<RecordPosition> {
        let tx = self
            .store
            .tx(true)
            .expect("begin rw transaction on directory store");
        let bucket = tx
            .get_bucket(BUCKET_NAME)
            .expect("directory bucket exists");
        let existing = bucket
            .get_kv(key)
            .and_then(|kv| RecordPosition::decode(kv.value()));
        if existing.is_none() {
            return None;
        }
        bucket
            .delete(key)
            .expect("remove position from directory store");
        tx.commit().expect("commit directory store transaction");
        existing
    }

    fn len(&self) -> usize {
        let tx = self
            .store
            .tx(false)
            .expect("begin ro transaction on directory store");
        let bucket = tx
            .get_bucket(BUCKET_NAME)
            .expect("directory bucket exists");
        bucket.kv_pairs().count()
    }

    fn iterator(&self, reverse: bool) -> IndexIterator {
        let tx = self
            .store
            .tx(false)
            .expect("begin ro transaction on directory store");
        let bucket = tx
            .get_bucket(BUCKET_NAME)
            .expect("directory bucket exists");
        let items = bucket
            .kv_pairs()
            .filter_map(|kv| {
                RecordPosition::decode(kv.value()).map(|pos| (kv.key().to_vec(), pos))
            })
            .collect();
        IndexIterator::new(items, reverse)
    }

    fn close(&self) -> Result<(), IndexError> {
        // every mutation committed its own transaction; nothing to flush
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file_id: u32, offset: i64) -> RecordPosition {
        RecordPosition::new(file_id, offset, 0)
    }

    #[test]
    fn positions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let index = BPlusTreeIndex::new(dir.path()).unwrap();
        index.put(b"k1".to_vec(), pos(0, 0));
        index.put(b"k2".to_vec(), pos(0, 32));
        index.close().unwrap();
        drop(index);

        let index = BPlusTreeIndex::new(dir.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(b"k2").unwrap().offset, 32);
    }

    #[test]
    fn put_reads_displaced_value_in_same_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let index = BPlusTreeIndex::new(dir.path()).unwrap();

        assert!(index.put(b"k".to_vec(), pos(1, 10)).is_none());
        let displaced = index.put(b"k".to_vec(), pos(2, 20)).unwrap();
        assert_eq!(displaced.file_id, 1);
        assert_eq!(displaced.offset, 10);
    }

    #[test]
    fn delete_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let index = BPlusTreeIndex::new(dir.path()).unwrap();
        assert!(index.delete(b"ghost").is_none());

        index.put(b"real".to_vec(), pos(0, 0));
        assert!(index.delete(b"real").is_some());
        assert!(index.get(b"real").is_none());
    }

    #[test]
    fn iterator_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let index = BPlusTreeIndex::new(dir.path()).unwrap();
        index.put(b"cherry".to_vec(), pos(0, 0));
        index.put(b"apple".to_vec(), pos(0, 8));
        index.put(b"banana".to_vec(), pos(0, 16));

        let mut it = index.iterator(false);
        assert_eq!(it.next().unwrap().0, b"apple");
        assert_eq!(it.next().unwrap().0, b"banana");
        assert_eq!(it.next().unwrap().0, b"cherry");
        assert!(it.next().is_none());
    }
}
