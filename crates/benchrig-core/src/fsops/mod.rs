//! Filesystem helpers for build artifacts and scratch directories.

use std::io;
use std::path::Path;

/// Delete every entry inside `dir`, leaving `dir` itself in place.
///
/// Symlinks are removed, never followed. Returns the number of top-level
/// entries removed.
pub fn purge_dir_contents(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Set unix permission bits on `path`, and on everything below it when
/// `recursive` is set.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32, recursive: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let max_depth = if recursive { usize::MAX } else { 0 };
    for entry in walkdir::WalkDir::new(path).max_depth(max_depth) {
        let entry = entry.map_err(io::Error::other)?;
        // Symlink targets may live outside the tree.
        if entry.path_is_symlink() {
            continue;
        }
        std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_mode(path: &Path, _mode: u32, _recursive: bool) -> io::Result<()> {
    std::fs::metadata(path).map(|_| ())
}
