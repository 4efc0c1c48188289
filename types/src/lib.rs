//! Domain types for leakwatch.
//!
//! Pure data with no IO: thread identities and censuses, allowlist rules, and
//! the failure types an audit session reports. Enumeration and polling live in
//! `leakwatch-core`.

#![allow(clippy::missing_errors_doc)]

mod allowlist;
mod census;
mod ids;
mod report;
mod thread;

pub use allowlist::{Allowlist, AllowlistRule};
pub use census::{Census, CensusError, diff};
pub use ids::{ResourceId, SessionId, ThreadKey};
pub use report::{LeakFailure, LeakReport, ResourceNotCollected};
pub use thread::{InvalidNamespace, Namespace, ThreadIdentity};
