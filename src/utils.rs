//! Filesystem helpers shared by the file-backed stores.

use std::fs;
use std::io;
use std::path::Path;

use crate::constants::checkpoint::TEMP_EXTENSION;

/// Create the parent directory of `path` when it has one.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Replace `path` with `bytes` by writing a sibling temp file and renaming it.
///
/// Readers observe either the previous content or the new content, never a
/// partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let tmp_path = path.with_extension(TEMP_EXTENSION);
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_dirs_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension(TEMP_EXTENSION).exists());
    }

    #[test]
    fn ensure_parent_dir_allows_plain_file_names() {
        ensure_parent_dir(Path::new("plain_file.txt")).unwrap();
    }
}
