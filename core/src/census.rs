//! Thread census capture.

use leakwatch_types::{Census, CensusError};

use crate::scope::ThreadScope;

pub use leakwatch_types::diff;

/// Snapshot the live threads visible in `scope`.
pub fn capture<S: ThreadScope + ?Sized>(scope: &S) -> Result<Census, CensusError> {
    let census = Census::from_identities(scope.enumerate()?);
    tracing::trace!(scope = %scope.describe(), threads = census.len(), "Captured thread census");
    Ok(census)
}
