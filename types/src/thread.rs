//! Thread identities and the namespace labels used to classify them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ThreadKey;

/// Label naming the subsystem a thread originates from (e.g. `worker`,
/// `background-compilation`).
///
/// # Invariants
///
/// - Never empty after trimming
/// - Stored trimmed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

#[derive(Debug, Error)]
#[error("thread namespace must not be empty")]
pub struct InvalidNamespace;

impl Namespace {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidNamespace> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(InvalidNamespace);
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Namespace used for threads whose name carries no usable label.
    #[must_use]
    pub fn unnamed() -> Self {
        Self("unnamed".to_string())
    }

    /// Derive a namespace from an OS thread name.
    ///
    /// The label is the leading segment before the first `-`, `:`, `.` or
    /// space, so `tokio-runtime-w` maps to `tokio`.
    #[must_use]
    pub fn from_thread_name(name: &str) -> Self {
        let head = name
            .trim()
            .split(['-', ':', '.', ' '])
            .next()
            .unwrap_or_default();
        Self::new(head).unwrap_or_else(|_| Self::unnamed())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl TryFrom<String> for Namespace {
    type Error = InvalidNamespace;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Namespace {
    type Error = InvalidNamespace;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live thread as seen by one census.
///
/// The key is the stable part; namespace and name are labels as of the
/// capture. Censuses are compared by key only (see [`crate::diff`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadIdentity {
    key: ThreadKey,
    namespace: Namespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    /// The name may be a kernel-truncated prefix of the real one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    name_truncated: bool,
}

impl ThreadIdentity {
    #[must_use]
    pub fn new(key: ThreadKey, namespace: Namespace) -> Self {
        Self {
            key,
            namespace,
            name: None,
            name_truncated: false,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self.name_truncated = false;
        self
    }

    /// Like [`ThreadIdentity::with_name`], for a name the OS may have cut
    /// short (Linux keeps 15 bytes of `comm`).
    #[must_use]
    pub fn with_truncated_name(self, name: impl Into<String>) -> Self {
        let mut identity = self.with_name(name);
        identity.name_truncated = identity.name.is_some();
        identity
    }

    #[must_use]
    pub fn key(&self) -> ThreadKey {
        self.key
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn is_name_truncated(&self) -> bool {
        self.name_truncated
    }

    /// Whether the thread name is `label`, allowing for truncation.
    #[must_use]
    pub fn name_is(&self, label: &str) -> bool {
        match self.name.as_deref() {
            Some(name) if self.name_truncated => label.starts_with(name),
            Some(name) => name == label,
            None => false,
        }
    }

    /// Whether the thread name may start with `prefix`, allowing for
    /// truncation.
    #[must_use]
    pub fn name_starts_with(&self, prefix: &str) -> bool {
        match self.name.as_deref() {
            Some(name) if name.starts_with(prefix) => true,
            Some(name) => self.name_truncated && prefix.starts_with(name),
            None => false,
        }
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} [{}] \"{}\"", self.key, self.namespace, name),
            None => write!(f, "{} [{}]", self.key, self.namespace),
        }
    }
}
