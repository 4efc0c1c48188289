//! Shared infrastructure utilities for leakwatch.
//!
//! Cross-cutting helpers that touch the OS or the clock and so don't belong in
//! the IO-free `leakwatch-types` crate:
//!
//! - **`backoff`**: Exponential backoff curve for bounded polling
//! - **`os_threads`**: Process thread enumeration (`/proc/self/task`)
//! - **`report_file`**: Crash-safe leak report persistence (temp + rename)

pub mod backoff;
pub mod os_threads;
pub mod report_file;

pub use backoff::Backoff;
pub use os_threads::{OsThread, list_process_threads};
pub use report_file::write_report;
