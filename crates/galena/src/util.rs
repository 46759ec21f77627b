//! Filesystem helpers: directory sizing, free-space probing, backup copy.

use std::fs;
use std::path::Path;

use crate::errors::Result;

/// Bytes the data directory occupies on disk.
pub(crate) fn dir_disk_size(dir_path: &Path) -> Result<u64> {
    let size = fs_extra::dir::get_size(dir_path).map_err(std::io::Error::other)?;
    Ok(size)
}

/// Free bytes on the volume holding `dir_path`.
pub(crate) fn available_disk_size(dir_path: &Path) -> Result<u64> {
    Ok(fs2::available_space(dir_path)?)
}

/// Recursively copies `src` into `dest`, skipping entries named in
/// `exclude`. Copying a directory onto itself is a no-op.
pub(crate) fn copy_dir(src: &Path, dest: &Path, exclude: &[&str]) -> Result<()> {
    if !dest.is_dir() {
        fs::create_dir_all(dest)?;
    }
    let src = src.canonicalize()?;
    let dest = dest.canonicalize()?;
    if src == dest {
        return Ok(());
    }
    copy_dir_entries(&src, &dest, exclude)
}

fn copy_dir_entries(src: &Path, dest: &Path, exclude: &[&str]) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|skip| name.to_str() == Some(*skip)) {
            continue;
        }
        let target = dest.join(&name);
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir_entries(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
