//! In-memory B-tree directory.

use std::collections::BTreeMap;

use galena_types::RecordPosition;
use parking_lot::RwLock;

use crate::{IndexError, IndexIterator, Indexer};

/// Ordered in-memory directory over [`BTreeMap`].
///
/// The default implementation: cheapest writes, ordered iteration for
/// free, rebuilt from the log (or the hint file) at every open.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeIndex {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<RecordPosition> {
        self.tree.write().remove(key)
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> IndexIterator {
        let items = self
            .tree
            .read()
            .iter()
            .map(|(k, p)| (k.clone(), *p))
            .collect();
        IndexIterator::new(items, reverse)
    }

    fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
