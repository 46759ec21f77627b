//! Engine error type.

use galena_index::IndexError;
use galena_io::IoError;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine surfaces to callers.
///
/// The variants fall into the kinds a caller handles differently: bad
/// input, engine state, failed lookups, on-disk corruption, and plain
/// I/O failures passed through from below.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ---- input ----
    /// Keys must be non-empty.
    #[error("key is empty")]
    KeyIsEmpty,

    /// Key or value is larger than the record framing supports (2^31 - 1).
    #[error("key or value exceeds the maximum record size")]
    RecordTooLarge,

    /// More operations staged than `max_batch_size` allows.
    #[error("batch holds more staged operations than max_batch_size")]
    ExceedMaxBatchSize,

    /// One of the open options is out of range.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    // ---- state ----
    /// Another process holds the advisory lock on the data directory.
    #[error("data directory is in use by another process")]
    DatabaseInUse,

    /// A merge is already running on this database.
    #[error("merge is already in progress")]
    MergeInProgress,

    /// The reclaimable fraction has not reached `merge_ratio` yet.
    #[error("reclaimable fraction is below the merge threshold")]
    MergeThresholdNotReached,

    /// The volume lacks room for the rewritten data set.
    #[error("not enough free disk space to merge")]
    InsufficientDiskSpace,

    /// Under the disk-backed directory the last batch sequence could not
    /// be restored, so batch commits cannot hand out safe sequences.
    #[error("batch sequence unavailable: seq-id file missing from a non-empty directory")]
    BatchSeqNotAvailable,

    // ---- lookup ----
    /// The key has no live record.
    #[error("key not found in database")]
    KeyNotFound,

    /// The directory references a segment that is not loaded; impossible
    /// outside corruption or foreign interference with the directory.
    #[error("data file referenced by the directory is missing")]
    DataFileNotFound,

    // ---- corruption ----
    /// A record failed its checksum.
    #[error("invalid crc value, log record may be corrupted")]
    InvalidRecordCrc,

    /// The data directory holds files the engine cannot account for.
    #[error("data directory may be corrupted")]
    DataDirectoryCorrupted,

    /// The key directory rejected an update it should have accepted.
    #[error("failed to update the key directory")]
    IndexUpdateFailed,

    // ---- control flow ----
    /// A scan ran off the end of a segment; never surfaced to callers.
    #[error("end of data file")]
    EndOfDataFile,

    // ---- pass-through ----
    /// Filesystem failure outside the I/O backends.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside an I/O backend.
    #[error(transparent)]
    Backend(#[from] IoError),

    /// Failure inside the key directory.
    #[error(transparent)]
    Index(#[from] IndexError),
}
