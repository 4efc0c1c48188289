//! Enumeration scopes for thread censuses.
//!
//! A census never looks at ambient "current group" state: the scope is handed
//! to the auditor at construction. Two scopes ship here:
//!
//! - [`ThreadGroup`]: a logical group. Only threads spawned through the group
//!   are visible, so concurrently running tests in one process don't see each
//!   other's threads.
//! - [`ProcessScope`]: every OS thread of the process. Suitable when the test
//!   binary runs one test at a time (`--test-threads=1`) or the subject spawns
//!   threads the caller cannot route through a group.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use leakwatch_types::{CensusError, Namespace, ThreadIdentity, ThreadKey};
use leakwatch_utils::list_process_threads;

/// Source of live thread identities for a census.
///
/// Implementations return a best-effort snapshot; the population may change
/// while it is being read.
pub trait ThreadScope: Send + Sync {
    fn enumerate(&self) -> Result<Vec<ThreadIdentity>, CensusError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<S: ThreadScope + ?Sized> ThreadScope for Arc<S> {
    fn enumerate(&self) -> Result<Vec<ThreadIdentity>, CensusError> {
        (**self).enumerate()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// All OS threads of the current process.
///
/// Identities use the kernel thread id as key and derive the namespace from
/// the thread name via [`Namespace::from_thread_name`]. Names at the kernel
/// length limit are marked truncated, so allowlist rules written against the
/// full name still match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessScope;

impl ThreadScope for ProcessScope {
    fn enumerate(&self) -> Result<Vec<ThreadIdentity>, CensusError> {
        let threads = list_process_threads()?;
        Ok(threads
            .into_iter()
            .map(|thread| {
                let namespace = Namespace::from_thread_name(&thread.name);
                let identity = ThreadIdentity::new(ThreadKey::new(thread.tid), namespace);
                if thread.may_be_truncated() {
                    identity.with_truncated_name(thread.name)
                } else {
                    identity.with_name(thread.name)
                }
            })
            .collect())
    }

    fn describe(&self) -> String {
        "process".to_string()
    }
}

/// A logical thread group.
///
/// A thread is a member from the moment [`ThreadGroup::spawn`] is called until
/// its body returns or unwinds, so a joined thread is never a member. Clones
/// share membership.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    inner: Arc<GroupInner>,
}

#[derive(Debug)]
struct GroupInner {
    label: String,
    next_key: AtomicU64,
    members: Mutex<BTreeMap<ThreadKey, ThreadIdentity>>,
}

impl GroupInner {
    fn members(&self) -> MutexGuard<'_, BTreeMap<ThreadKey, ThreadIdentity>> {
        // Membership stays consistent even if a holder panicked: every
        // critical section is a single insert, remove or clone.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its thread from the group when dropped.
struct Membership {
    group: Arc<GroupInner>,
    key: ThreadKey,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.group.members().remove(&self.key);
    }
}

impl ThreadGroup {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                label: label.into(),
                next_key: AtomicU64::new(1),
                members: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Number of live members.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.inner.members().len()
    }

    /// Spawn a named thread as a member of this group.
    ///
    /// The thread is registered before the OS thread starts, so a census taken
    /// after `spawn` returns always sees it.
    pub fn spawn<F, T>(
        &self,
        namespace: Namespace,
        name: impl Into<String>,
        body: F,
    ) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let key = ThreadKey::new(self.inner.next_key.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let identity = ThreadIdentity::new(key, namespace).with_name(name.clone());
        self.inner.members().insert(key, identity);

        let membership = Membership {
            group: Arc::clone(&self.inner),
            key,
        };

        let mut builder = thread::Builder::new();
        if !name.is_empty() {
            builder = builder.name(name);
        }
        // On failure the closure is dropped unrun, which drops the membership.
        builder.spawn(move || {
            let _membership = membership;
            body()
        })
    }
}

impl ThreadScope for ThreadGroup {
    fn enumerate(&self) -> Result<Vec<ThreadIdentity>, CensusError> {
        Ok(self.inner.members().values().cloned().collect())
    }

    fn describe(&self) -> String {
        format!("group {:?}", self.inner.label)
    }
}
