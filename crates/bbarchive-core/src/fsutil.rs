//! Filesystem helpers: atomic writes and stale partial-download cleanup

use std::fs;
use std::io::Write;
use std::path::Path;

/// Suffix of in-flight media downloads. Archived names never end in it.
pub const PARTIAL_SUFFIX: &str = ".bbarchive-part";

/// Suffix of in-flight atomic writes
pub const TMP_SUFFIX: &str = ".bbarchive-tmp";

/// Write `bytes` to `path` via a sibling [`TMP_SUFFIX`] file and rename.
///
/// Creates parent directories. A crash leaves either the old file or the
/// new one, never a truncated mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// Remove leftovers of an interrupted run under `root`.
///
/// Only files carrying [`PARTIAL_SUFFIX`] or [`TMP_SUFFIX`] are touched;
/// archived media named `*.part` or `*.tmp` upstream stay. Returns the
/// number of files removed. A missing root is not an error.
pub fn cleanup_partial_downloads(root: &Path) -> std::io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for suffix in [PARTIAL_SUFFIX, TMP_SUFFIX] {
        let pattern = root.join("**").join(format!("*{suffix}"));
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        for path in paths.flatten() {
            if path.is_file() {
                log::warn!("Removing stale partial file: {}", path.display());
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
