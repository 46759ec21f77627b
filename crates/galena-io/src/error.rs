//! I/O error types.

/// Errors from the I/O backends.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Underlying OS I/O error.
    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A mutating operation was attempted on a read-only backend.
    ///
    /// The memory-mapped backend serves startup reads only; routing a
    /// write or sync through it is a programming error in the caller.
    #[error("{op} is not supported through the memory-mapped backend")]
    ReadOnlyBackend { op: &'static str },
}
