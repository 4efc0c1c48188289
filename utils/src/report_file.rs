//! Atomic persistence of leak report artifacts.
//!
//! Uses a temp file + rename pattern so a CI collector never picks up a
//! half-written report. Report names are unique per session; an existing file
//! with the same name is replaced.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// Write `bytes` to `dir/file_name`, creating `dir` if needed.
///
/// Returns the final path.
pub fn write_report(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    if let Err(err) = tmp.persist(&path) {
        if !path.exists() {
            return Err(err.error);
        }
        // Rename-over-existing fails on some platforms: remove and retry once.
        fs::remove_file(&path)?;
        err.file.persist(&path).map_err(|e| e.error)?;
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote leak report");
    Ok(path)
}
