//! Rules naming threads that may outlive an audit session.

use std::fmt;
use std::sync::Arc;

use crate::{Namespace, ThreadIdentity};

type ThreadPredicate = dyn Fn(&ThreadIdentity) -> bool + Send + Sync;

/// A predicate over [`ThreadIdentity`] permitting the thread to persist.
#[derive(Clone)]
pub enum AllowlistRule {
    /// Namespace or thread name equals the given label.
    Namespace(Namespace),
    /// Namespace or thread name starts with the given prefix.
    NamespacePrefix(String),
    /// Caller-supplied predicate, tagged with a label for diagnostics.
    Custom {
        label: String,
        predicate: Arc<ThreadPredicate>,
    },
}

impl AllowlistRule {
    #[must_use]
    pub fn namespace(namespace: Namespace) -> Self {
        Self::Namespace(namespace)
    }

    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::NamespacePrefix(prefix.into())
    }

    pub fn custom<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ThreadIdentity) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn matches(&self, identity: &ThreadIdentity) -> bool {
        match self {
            Self::Namespace(namespace) => {
                identity.namespace() == namespace || identity.name_is(namespace.as_str())
            }
            Self::NamespacePrefix(prefix) => {
                identity.namespace().starts_with(prefix) || identity.name_starts_with(prefix)
            }
            Self::Custom { predicate, .. } => (**predicate)(identity),
        }
    }
}

impl fmt::Debug for AllowlistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(namespace) => f.debug_tuple("Namespace").field(namespace).finish(),
            Self::NamespacePrefix(prefix) => {
                f.debug_tuple("NamespacePrefix").field(prefix).finish()
            }
            Self::Custom { label, .. } => f.debug_struct("Custom").field("label", label).finish(),
        }
    }
}

impl fmt::Display for AllowlistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(namespace) => write!(f, "namespace == {namespace}"),
            Self::NamespacePrefix(prefix) => write!(f, "namespace starts with {prefix:?}"),
            Self::Custom { label, .. } => write!(f, "custom: {label}"),
        }
    }
}

/// Ordered set of allowlist rules. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    rules: Vec<AllowlistRule>,
}

impl Allowlist {
    #[must_use]
    pub fn new(rules: Vec<AllowlistRule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: AllowlistRule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn rules(&self) -> &[AllowlistRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn first_match(&self, identity: &ThreadIdentity) -> Option<&AllowlistRule> {
        self.rules.iter().find(|rule| rule.matches(identity))
    }

    #[must_use]
    pub fn permits(&self, identity: &ThreadIdentity) -> bool {
        self.first_match(identity).is_some()
    }

    /// Split identities into `(permitted, leaked)`, preserving input order.
    pub fn partition<I>(&self, identities: I) -> (Vec<ThreadIdentity>, Vec<ThreadIdentity>)
    where
        I: IntoIterator<Item = ThreadIdentity>,
    {
        identities
            .into_iter()
            .partition(|identity| self.permits(identity))
    }
}

impl FromIterator<AllowlistRule> for Allowlist {
    fn from_iter<I: IntoIterator<Item = AllowlistRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
