//! Buffered file backend using `std::fs`.
//!
//! Files are opened create+read+write+append: reads are positional and do
//! not disturb the append cursor, writes always land at the end.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::RwLock;

use crate::{IoBackend, IoError};

/// Read–write backend over a plain file descriptor.
///
/// Positional reads go through `pread` on Unix and therefore take the lock
/// in shared mode; appends and syncs serialize on the exclusive side.
#[derive(Debug)]
pub struct FileIo {
    fd: RwLock<File>,
}

impl FileIo {
    /// Opens (or creates) `path` for appending.
    pub fn new(path: &Path) -> Result<Self, IoError> {
        let fd = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            fd: RwLock::new(fd),
        })
    }
}

impl IoBackend for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let fd = self.fd.read();

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(fd.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            Ok(fd.seek_read(buf, offset)?)
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        let mut fd = self.fd.write();
        fd.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<(), IoError> {
        self.fd.read().sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64, IoError> {
        Ok(self.fd.read().metadata()?.len())
    }

    fn close(&self) -> Result<(), IoError> {
        // the descriptor is released when the backend drops
        Ok(())
    }
}
