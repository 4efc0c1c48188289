//! Leak failures and the aggregated report surfaced at session teardown.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::{ResourceId, SessionId, ThreadIdentity};

/// A registered resource stayed reachable after the bounded retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("resource {label} ({id}) still reachable after {attempts} attempt(s)")]
pub struct ResourceNotCollected {
    pub id: ResourceId,
    pub label: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeakFailure {
    ResourceNotCollected(ResourceNotCollected),
    /// Threads outside the baseline and outside the allowlist.
    UnexpectedThreadLeak { threads: Vec<ThreadIdentity> },
    /// The teardown census could not be taken, so thread leaks are unknown.
    CensusUnavailable { reason: String },
}

impl fmt::Display for LeakFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceNotCollected(failure) => write!(f, "{failure}"),
            Self::UnexpectedThreadLeak { threads } => {
                write!(f, "{} unexpected thread(s) still alive:", threads.len())?;
                for thread in threads {
                    write!(f, "\n    {thread}")?;
                }
                Ok(())
            }
            Self::CensusUnavailable { reason } => {
                write!(f, "teardown thread census unavailable: {reason}")
            }
        }
    }
}

/// Every failure found by one session teardown.
///
/// Built only when at least one failure exists; a session that finds nothing
/// reports success instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    session: SessionId,
    failures: Vec<LeakFailure>,
}

impl LeakReport {
    /// Returns `None` when `failures` is empty.
    #[must_use]
    pub fn from_failures(session: SessionId, failures: Vec<LeakFailure>) -> Option<Self> {
        (!failures.is_empty()).then_some(Self { session, failures })
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub fn failures(&self) -> &[LeakFailure] {
        &self.failures
    }

    pub fn not_collected(&self) -> impl Iterator<Item = &ResourceNotCollected> {
        self.failures.iter().filter_map(|failure| match failure {
            LeakFailure::ResourceNotCollected(inner) => Some(inner),
            _ => None,
        })
    }

    pub fn leaked_threads(&self) -> impl Iterator<Item = &ThreadIdentity> {
        self.failures
            .iter()
            .filter_map(|failure| match failure {
                LeakFailure::UnexpectedThreadLeak { threads } => Some(threads.iter()),
                _ => None,
            })
            .flatten()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "leak audit session {} found {} failure(s):",
            self.session,
            self.failures.len()
        )?;
        for (index, failure) in self.failures.iter().enumerate() {
            write!(f, "\n  {}. {failure}", index + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for LeakReport {}
