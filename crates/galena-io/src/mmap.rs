//! Read-only memory-mapped backend.
//!
//! Used as a startup accelerator: replaying immutable segments through a
//! mapping avoids one buffer copy per record. The mapping is taken once at
//! open; the engine rebinds segments to buffered I/O after the replay, so
//! a stale length is never observed through this backend.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::Mmap;

use crate::{IoBackend, IoError};

/// Read-only backend over a memory mapping.
///
/// `write` and `sync` fail with [`IoError::ReadOnlyBackend`]; an empty
/// file is represented without a mapping (zero-length mappings are not
/// portable).
#[derive(Debug)]
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    /// Opens (or creates) `path` and maps its current contents.
    #[allow(unsafe_code)]
    pub fn new(path: &Path) -> Result<Self, IoError> {
        let fd = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = fd.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the engine never truncates or rewrites mapped
            // segments; only the append-only active segment mutates, and
            // that one is never opened through this backend.
            Some(unsafe { Mmap::map(&fd)? })
        };
        Ok(Self { map })
    }
}

impl IoBackend for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let Some(map) = &self.map else {
            return Ok(0);
        };
        let len = map.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(map.len() - start);
        buf[..n].copy_from_slice(&map[start..start + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, IoError> {
        Err(IoError::ReadOnlyBackend { op: "write" })
    }

    fn sync(&self) -> Result<(), IoError> {
        Err(IoError::ReadOnlyBackend { op: "sync" })
    }

    fn size(&self) -> Result<u64, IoError> {
        Ok(self.map.as_ref().map_or(0, |m| m.len() as u64))
    }

    fn close(&self) -> Result<(), IoError> {
        // the mapping is released when the backend drops
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileIo;

    #[test]
    fn reads_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.dat");

        let file = FileIo::new(&path).unwrap();
        file.write(b"0123456789").unwrap();
        file.sync().unwrap();

        let map = MmapIo::new(&path).unwrap();
        assert_eq!(map.size().unwrap(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(map.read(&mut buf, 3).unwrap(), 4);
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn empty_file_maps_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = MmapIo::new(&dir.path().join("empty.dat")).unwrap();
        assert_eq!(map.size().unwrap(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(map.read(&mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn read_clamps_to_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamp.dat");
        let file = FileIo::new(&path).unwrap();
        file.write(b"abc").unwrap();

        let map = MmapIo::new(&path).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(map.read(&mut buf, 2).unwrap(), 1);
        assert_eq!(map.read(&mut buf, 3).unwrap(), 0);
        assert_eq!(map.read(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn writes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let map = MmapIo::new(&dir.path().join("ro.dat")).unwrap();
        assert!(matches!(
            map.write(b"nope"),
            Err(IoError::ReadOnlyBackend { op: "write" })
        ));
        assert!(matches!(
            map.sync(),
            Err(IoError::ReadOnlyBackend { op: "sync" })
        ));
    }
}
