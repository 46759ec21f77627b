//! Deterministic key/value generators shared by the engine tests.

use std::path::Path;

use bytes::Bytes;

use crate::options::Options;

/// Options rooted at `dir` with a comfortably large segment size.
pub(crate) fn test_options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        max_file_size: 64 * 1024 * 1024,
        ..Options::default()
    }
}

/// A 20-byte key, unique per `i`.
pub(crate) fn test_key(i: usize) -> Bytes {
    Bytes::from(format!("galena-key-{i:09}"))
}

/// A value of exactly `len` bytes, seeded from `i`.
pub(crate) fn test_value(i: usize, len: usize) -> Bytes {
    let mut value = format!("galena-value-{i:09}").into_bytes();
    value.resize(len, b'x');
    Bytes::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_are_deterministic() {
        assert_eq!(test_key(3), test_key(3));
        assert_eq!(test_key(1).len(), 20);
        assert_eq!(test_value(5, 64).len(), 64);
        assert_eq!(test_value(5, 8).len(), 8);
        assert_ne!(test_value(5, 64), test_value(6, 64));
    }
}
