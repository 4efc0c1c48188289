//! Point-in-time thread censuses.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use thiserror::Error;

use crate::{ThreadIdentity, ThreadKey};

/// Immutable set of thread identities captured at one instant, keyed by
/// [`ThreadKey`].
///
/// There are no mutators: a census is built once from an enumeration and only
/// compared afterwards. If an enumeration yields the same key twice, the last
/// identity wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Census {
    threads: BTreeMap<ThreadKey, ThreadIdentity>,
}

impl Census {
    #[must_use]
    pub fn from_identities(identities: impl IntoIterator<Item = ThreadIdentity>) -> Self {
        Self {
            threads: identities
                .into_iter()
                .map(|identity| (identity.key(), identity))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: ThreadKey) -> bool {
        self.threads.contains_key(&key)
    }

    #[must_use]
    pub fn get(&self, key: ThreadKey) -> Option<&ThreadIdentity> {
        self.threads.get(&key)
    }

    /// Identities in key order.
    pub fn iter(&self) -> std::collections::btree_map::Values<'_, ThreadKey, ThreadIdentity> {
        self.threads.values()
    }

    /// Identities in `self` whose key is absent from `baseline`.
    ///
    /// Only the key decides: a baseline thread that was renamed or
    /// reclassified since is not new. Returned identities carry the labels
    /// seen in `self`.
    #[must_use]
    pub fn new_since(&self, baseline: &Census) -> BTreeSet<ThreadIdentity> {
        self.threads
            .iter()
            .filter(|(key, _)| !baseline.threads.contains_key(key))
            .map(|(_, identity)| identity.clone())
            .collect()
    }
}

impl<'a> IntoIterator for &'a Census {
    type Item = &'a ThreadIdentity;
    type IntoIter = std::collections::btree_map::Values<'a, ThreadKey, ThreadIdentity>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<ThreadIdentity> for Census {
    fn from_iter<I: IntoIterator<Item = ThreadIdentity>>(iter: I) -> Self {
        Self::from_identities(iter)
    }
}

/// Identities in `current` whose key is absent from `baseline`.
#[must_use]
pub fn diff(baseline: &Census, current: &Census) -> BTreeSet<ThreadIdentity> {
    current.new_since(baseline)
}

#[derive(Debug, Error)]
pub enum CensusError {
    #[error("thread enumeration is not supported on {platform}")]
    Unsupported { platform: &'static str },
    #[error("failed to enumerate threads under {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
