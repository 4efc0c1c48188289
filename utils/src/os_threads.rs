//! Boundary: enumerates the OS threads of the current process.
//!
//! All `/proc` access lives here. Callers get strict `(tid, name)` pairs and
//! decide how to classify them.

use leakwatch_types::CensusError;

/// Longest thread name the kernel keeps, in bytes (`TASK_COMM_LEN - 1`).
pub const COMM_MAX_LEN: usize = 15;

/// One OS thread of this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsThread {
    pub tid: u64,
    /// Kernel thread name (`comm`), at most [`COMM_MAX_LEN`] bytes.
    pub name: String,
}

impl OsThread {
    /// A name at the kernel limit may have been cut short.
    #[must_use]
    pub fn may_be_truncated(&self) -> bool {
        self.name.len() >= COMM_MAX_LEN
    }
}

#[cfg(target_os = "linux")]
pub fn list_process_threads() -> Result<Vec<OsThread>, CensusError> {
    use std::fs;
    use std::path::Path;

    let task_dir = Path::new("/proc/self/task");
    let entries = fs::read_dir(task_dir).map_err(|source| CensusError::Io {
        path: task_dir.to_path_buf(),
        source,
    })?;

    let mut threads = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CensusError::Io {
            path: task_dir.to_path_buf(),
            source,
        })?;
        let Some(tid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };

        // The thread exited between read_dir and this read.
        let Ok(comm) = fs::read_to_string(entry.path().join("comm")) else {
            tracing::trace!(tid, "Thread exited during enumeration");
            continue;
        };
        threads.push(OsThread {
            tid,
            name: comm.trim_end_matches('\n').to_string(),
        });
    }

    threads.sort_by_key(|thread| thread.tid);
    tracing::trace!(count = threads.len(), "Listed process threads");
    Ok(threads)
}

#[cfg(not(target_os = "linux"))]
pub fn list_process_threads() -> Result<Vec<OsThread>, CensusError> {
    Err(CensusError::Unsupported {
        platform: std::env::consts::OS,
    })
}
