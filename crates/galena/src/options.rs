//! Engine configuration.

use std::path::PathBuf;

pub use galena_index::IndexKind;

/// Options accepted by [`Database::open`](crate::Database::open).
#[derive(Debug, Clone)]
pub struct Options {
    /// Data directory; created when missing.
    pub dir_path: PathBuf,

    /// Segment rotation threshold in bytes. Must be positive.
    pub max_file_size: u64,

    /// Force every append to stable storage before returning.
    pub sync_writes: bool,

    /// Sync after this many unsynced bytes; zero disables the accumulator.
    pub bytes_per_sync: u64,

    /// Which key-directory implementation to run with.
    pub index_kind: IndexKind,

    /// Map immutable segments into memory for the startup replay.
    pub mmap_at_startup: bool,

    /// Reclaimable fraction of the directory that makes a merge
    /// worthwhile, in `[0, 1]`.
    pub merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("galena"),
            max_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_kind: IndexKind::BTree,
            mmap_at_startup: false,
            merge_ratio: 0.5,
        }
    }
}

/// Options for [`Database::iter`](crate::Database::iter).
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix; empty matches all.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

/// Options for [`Database::new_write_batch`](crate::Database::new_write_batch).
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Upper bound on staged operations per commit.
    pub max_batch_size: u32,

    /// Sync the active segment once the batch is fully appended.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_writes: true,
        }
    }
}
