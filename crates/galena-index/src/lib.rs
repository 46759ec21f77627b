//! # galena-index: the key directory
//!
//! The key directory is the engine's one polymorphic seam: an ordered map
//! from raw key bytes to the [`RecordPosition`] of the key's most recent
//! log record. Three implementations share the [`Indexer`] contract:
//!
//! - [`BTreeIndex`] — in-memory ordered map (the default)
//! - [`ArtIndex`] — in-memory adaptive radix tree
//! - [`BPlusTreeIndex`] — disk-backed store that survives restarts and
//!   lets the engine skip the startup replay
//!
//! `put` and `delete` hand back the displaced position; the engine feeds
//! those into its reclaim accounting, so implementations must report them
//! accurately.
//!
//! Iteration is snapshot-based: [`Indexer::iterator`] captures the live
//! `(key, position)` pairs in lexicographic order and the cursor then
//! seeks with binary search. The snapshot keeps the cursor valid across
//! concurrent writes without holding the directory lock open.

mod art;
mod bptree;
mod btree;

use std::path::Path;

pub use art::ArtIndex;
pub use bptree::BPlusTreeIndex;
pub use btree::BTreeIndex;
use galena_types::RecordPosition;

/// Which key-directory implementation to run the engine with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// In-memory B-tree.
    #[default]
    BTree,
    /// In-memory adaptive radix tree.
    Art,
    /// Disk-backed B+ tree.
    BPlusTree,
}

/// Errors from the key directory.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The disk-backed directory store failed to open or commit.
    #[error("directory store failure: {source}")]
    Store {
        #[from]
        source: jammdb::Error,
    },
}

/// Ordered map from key bytes to the position of the key's latest record.
///
/// Implementations synchronize internally; shared references are usable
/// from concurrent readers and the single writer alike.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces `key`, returning the displaced position if the
    /// key was already present.
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition>;

    /// Looks up the position for `key`.
    fn get(&self, key: &[u8]) -> Option<RecordPosition>;

    /// Removes `key`, returning the position it mapped to, or `None` when
    /// the key was not present.
    fn delete(&self, key: &[u8]) -> Option<RecordPosition>;

    /// Number of live keys.
    fn len(&self) -> usize;

    /// Returns `true` when the directory holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots the directory into a lexicographic cursor.
    fn iterator(&self, reverse: bool) -> IndexIterator;

    /// Releases directory resources.
    fn close(&self) -> Result<(), IndexError>;
}

/// Builds the directory selected by `kind`.
///
/// `dir_path` is only consulted by the disk-backed implementation, which
/// keeps its store file inside the data directory.
pub fn new_indexer(kind: IndexKind, dir_path: &Path) -> Result<Box<dyn Indexer>, IndexError> {
    match kind {
        IndexKind::BTree => Ok(Box::new(BTreeIndex::new())),
        IndexKind::Art => Ok(Box::new(ArtIndex::new())),
        IndexKind::BPlusTree => Ok(Box::new(BPlusTreeIndex::new(dir_path)?)),
    }
}

/// Cursor over a directory snapshot.
///
/// The cursor is lazy and restartable: [`rewind`](IndexIterator::rewind)
/// returns to the first element, [`seek`](IndexIterator::seek) positions at
/// the first key `>=` the target (`<=` when reversed), and
/// [`next`](IndexIterator::next) yields the current entry and advances.
pub struct IndexIterator {
    /// Snapshot entries, ascending — or descending when `reverse` is set.
    items: Vec<(Vec<u8>, RecordPosition)>,
    cursor: usize,
    reverse: bool,
}

impl IndexIterator {
    /// Builds a cursor from entries sorted ascending by key.
    pub(crate) fn new(mut items: Vec<(Vec<u8>, RecordPosition)>, reverse: bool) -> Self {
        debug_assert!(items.windows(2).all(|w| w[0].0 < w[1].0));
        if reverse {
            items.reverse();
        }
        Self {
            items,
            cursor: 0,
            reverse,
        }
    }

    /// Repositions at the first element.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Positions at the first key `>= key` (`<= key` when reversed).
    pub fn seek(&mut self, key: &[u8]) {
        self.cursor = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    /// Yields the entry under the cursor and advances past it.
    pub fn next(&mut self) -> Option<(&[u8], RecordPosition)> {
        let (key, pos) = self.items.get(self.cursor)?;
        self.cursor += 1;
        Some((key.as_slice(), *pos))
    }

    /// Number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn pos(file_id: u32, offset: i64) -> RecordPosition {
        RecordPosition::new(file_id, offset, 8)
    }

    fn sample() -> Vec<(Vec<u8>, RecordPosition)> {
        vec![
            (b"aardvark".to_vec(), pos(0, 0)),
            (b"badger".to_vec(), pos(0, 8)),
            (b"bison".to_vec(), pos(1, 0)),
            (b"crane".to_vec(), pos(1, 8)),
        ]
    }

    #[test]
    fn forward_order() {
        let mut it = IndexIterator::new(sample(), false);
        let mut keys = Vec::new();
        while let Some((k, _)) = it.next() {
            keys.push(k.to_vec());
        }
        assert_eq!(keys, vec![
            b"aardvark".to_vec(),
            b"badger".to_vec(),
            b"bison".to_vec(),
            b"crane".to_vec(),
        ]);
    }

    #[test]
    fn reverse_order() {
        let mut it = IndexIterator::new(sample(), true);
        assert_eq!(it.next().unwrap().0, b"crane");
        assert_eq!(it.next().unwrap().0, b"bison");
    }

    #[test]
    fn rewind_restarts() {
        let mut it = IndexIterator::new(sample(), false);
        it.next();
        it.next();
        it.rewind();
        assert_eq!(it.next().unwrap().0, b"aardvark");
    }

    #[test]
    fn seek_forward_lands_on_first_at_or_after() {
        let mut it = IndexIterator::new(sample(), false);
        it.seek(b"bat");
        assert_eq!(it.next().unwrap().0, b"bison");

        it.seek(b"badger");
        assert_eq!(it.next().unwrap().0, b"badger");

        it.seek(b"zebra");
        assert!(it.next().is_none());
    }

    #[test]
    fn seek_reverse_lands_on_first_at_or_before() {
        let mut it = IndexIterator::new(sample(), true);
        it.seek(b"bat");
        assert_eq!(it.next().unwrap().0, b"badger");

        it.seek(b"bison");
        assert_eq!(it.next().unwrap().0, b"bison");

        it.seek(b"a");
        assert!(it.next().is_none());
    }

    #[test_case(IndexKind::BTree; "btree")]
    #[test_case(IndexKind::Art; "art")]
    #[test_case(IndexKind::BPlusTree; "bplustree")]
    fn indexer_contract(kind: IndexKind) {
        let dir = tempfile::tempdir().unwrap();
        let index = new_indexer(kind, dir.path()).unwrap();

        assert!(index.is_empty());
        assert_eq!(index.put(b"k1".to_vec(), pos(0, 0)), None);
        assert_eq!(index.put(b"k2".to_vec(), pos(0, 8)), None);

        // replacing reports the displaced position
        let old = index.put(b"k1".to_vec(), pos(1, 0)).unwrap();
        assert_eq!(old.offset, 0);

        assert_eq!(index.get(b"k1").unwrap().file_id, 1);
        assert_eq!(index.get(b"missing"), None);
        assert_eq!(index.len(), 2);

        let removed = index.delete(b"k2").unwrap();
        assert_eq!(removed.offset, 8);
        assert_eq!(index.delete(b"k2"), None);
        assert_eq!(index.len(), 1);

        let mut it = index.iterator(false);
        assert_eq!(it.next().unwrap().0, b"k1");
        assert!(it.next().is_none());

        index.close().unwrap();
    }
}
