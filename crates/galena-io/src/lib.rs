//! # galena-io: I/O backend abstraction for Galena
//!
//! This crate provides a trait-based abstraction over per-file I/O,
//! enabling the engine to swap strategies per segment:
//!
//! - **[`FileIo`]** (default): buffered `std::fs` I/O opened
//!   create+read+write+append, with positional reads
//! - **[`MmapIo`]**: read-only memory mapping, used to accelerate the
//!   startup replay of immutable segments
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │          galena          │
//! │   (uses IoBackend trait) │
//! └────────────┬─────────────┘
//!              │
//! ┌────────────┴─────────────┐
//! │        galena-io         │
//! │  ┌────────┐  ┌─────────┐ │
//! │  │ FileIo │  │ MmapIo  │ │
//! │  │ (rw)   │  │ (ro)    │ │
//! │  └────────┘  └─────────┘ │
//! └──────────────────────────┘
//! ```
//!
//! Backends are selected per file via [`IoKind`] and can be rebound at
//! runtime: the engine maps immutable segments at open and switches them
//! back to buffered I/O once the initial replay is done.

mod error;
mod file;
mod mmap;

use std::path::Path;

pub use error::IoError;
pub use file::FileIo;
pub use mmap::MmapIo;

/// Which I/O strategy to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoKind {
    /// Buffered file I/O; the only backend that can write.
    #[default]
    Standard,
    /// Read-only memory mapping.
    MemoryMap,
}

/// Abstraction over the per-file I/O operations the engine needs.
///
/// All operations are synchronous and may block. Implementations are
/// internally synchronized so a shared reference can be used from
/// concurrent readers.
pub trait IoBackend: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the bytes read.
    ///
    /// A read reaching past the end of the file returns the available
    /// prefix; callers clamp their requests to [`IoBackend::size`].
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError>;

    /// Appends `buf` in full, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize, IoError>;

    /// Forces written data to stable storage.
    fn sync(&self) -> Result<(), IoError>;

    /// Returns the current file size in bytes.
    fn size(&self) -> Result<u64, IoError>;

    /// Releases backend resources.
    ///
    /// File descriptors and mappings are also released on drop; `close`
    /// exists so callers can surface release failures explicitly.
    fn close(&self) -> Result<(), IoError>;
}

/// Opens `path` with the requested I/O strategy.
pub fn new_io_backend(path: &Path, kind: IoKind) -> Result<Box<dyn IoBackend>, IoError> {
    match kind {
        IoKind::Standard => Ok(Box::new(FileIo::new(path)?)),
        IoKind::MemoryMap => Ok(Box::new(MmapIo::new(path)?)),
    }
}
