//! Database iteration.
//!
//! An [`Iter`] walks a snapshot of the key directory in lexicographic
//! order (or reverse), resolving each position to its value through the
//! engine. A non-empty prefix narrows the walk to keys that start with
//! it.

use bytes::Bytes;
use galena_index::IndexIterator;

use crate::db::Database;
use crate::errors::Result;
use crate::options::IteratorOptions;

/// Cursor over the live keys of a [`Database`].
///
/// The key set is snapshotted at construction; values are read lazily on
/// each step, so a value observed through the iterator is whatever the
/// log held at the time of the step.
pub struct Iter<'a> {
    db: &'a Database,
    index_iter: IndexIterator,
    options: IteratorOptions,
}

impl Database {
    /// Opens an iterator with the given options.
    pub fn iter(&self, options: IteratorOptions) -> Iter<'_> {
        Iter {
            db: self,
            index_iter: self.index.iterator(options.reverse),
            options,
        }
    }
}

impl Iter<'_> {
    /// Repositions at the first key (the last, when reversed).
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
    }

    /// Positions at the first key `>= key` (`<=` when reversed).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
    }

    /// Yields the next matching pair and advances.
    pub fn next(&mut self) -> Option<Result<(Bytes, Bytes)>> {
        loop {
            let (key, pos) = self.index_iter.next()?;
            if !self.options.prefix.is_empty() && !key.starts_with(&self.options.prefix) {
                continue;
            }
            let key = Bytes::copy_from_slice(key);
            return Some(self.db.get_value_by_position(pos).map(|value| (key, value)));
        }
    }
}
