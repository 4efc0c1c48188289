//! Weak observation of registered resources.
//!
//! An observation holds only a `Weak` to the resource, so registering never
//! extends its lifetime. Reclamation is deterministic once the last `Arc`
//! drops, but the last owner is often a worker thread that is still winding
//! down when teardown starts. [`WeakResourceRegistry::await_cleared`] absorbs
//! that with a bounded poll: ask the [`CollectionAssist`] for a pass, check,
//! back off, repeat.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;

use tracing::{debug, trace};

use leakwatch_types::{ResourceId, ResourceNotCollected};
use leakwatch_utils::Backoff;

/// Best-effort reclamation request issued before every reachability poll.
pub trait CollectionAssist: Send + Sync {
    fn request_collection(&self);
}

/// Default assist: yields the calling thread so owners running elsewhere can
/// make progress toward dropping their references.
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldAssist;

impl CollectionAssist for YieldAssist {
    fn request_collection(&self) {
        thread::yield_now();
    }
}

/// Adapts a closure into a [`CollectionAssist`], e.g. to nudge an engine's
/// cleanup queue before each poll.
pub struct FnAssist<F>(F);

impl<F> FnAssist<F>
where
    F: Fn() + Send + Sync,
{
    pub fn new(assist: F) -> Self {
        Self(assist)
    }
}

impl<F> CollectionAssist for FnAssist<F>
where
    F: Fn() + Send + Sync,
{
    fn request_collection(&self) {
        (self.0)();
    }
}

impl<F> fmt::Debug for FnAssist<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnAssist")
    }
}

/// Attempt bound and backoff curve for [`WeakResourceRegistry::await_cleared`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AwaitPolicy {
    /// Polls before giving up. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for AwaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::default(),
        }
    }
}

impl AwaitPolicy {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

trait Reachability: Send + Sync {
    fn is_reachable(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Reachability for Weak<T> {
    fn is_reachable(&self) -> bool {
        self.strong_count() > 0
    }
}

/// Non-owning view of one registered resource.
pub struct WeakObservation {
    id: ResourceId,
    label: String,
    target: Box<dyn Reachability>,
}

impl WeakObservation {
    fn new<T>(id: ResourceId, label: String, resource: &Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            id,
            label,
            target: Box::new(Arc::downgrade(resource)),
        }
    }

    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Non-blocking: true once no strong reference remains.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        !self.target.is_reachable()
    }
}

impl fmt::Debug for WeakObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObservation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

/// Observations for one session, keyed by registration order.
pub struct WeakResourceRegistry {
    next_id: u64,
    observations: BTreeMap<ResourceId, WeakObservation>,
    assist: Arc<dyn CollectionAssist>,
}

impl WeakResourceRegistry {
    #[must_use]
    pub fn new(assist: Arc<dyn CollectionAssist>) -> Self {
        Self {
            next_id: 1,
            observations: BTreeMap::new(),
            assist,
        }
    }

    /// Start observing `resource`. The registry keeps only a weak reference.
    pub fn observe<T>(&mut self, resource: &Arc<T>, label: impl Into<String>) -> ResourceId
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = ResourceId::new(self.next_id);
        self.next_id += 1;
        let observation = WeakObservation::new(id, label.into(), resource);
        trace!(%id, label = observation.label(), "Observing resource");
        self.observations.insert(id, observation);
        id
    }

    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&WeakObservation> {
        self.observations.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WeakObservation> {
        self.observations.values()
    }

    /// Poll `observation` until cleared or `policy` is exhausted.
    ///
    /// Each attempt requests a collection pass, then checks. Between attempts
    /// the thread sleeps per the backoff; no sleep follows the last attempt.
    pub fn await_cleared(
        &self,
        observation: &WeakObservation,
        policy: &AwaitPolicy,
    ) -> Result<(), ResourceNotCollected> {
        let attempts = policy.attempts();
        for step in 0..attempts {
            self.assist.request_collection();
            if observation.is_cleared() {
                debug!(
                    id = %observation.id(),
                    label = observation.label(),
                    attempt = step + 1,
                    "Resource cleared"
                );
                return Ok(());
            }
            if step + 1 < attempts {
                let delay = policy.backoff.delay(step);
                trace!(id = %observation.id(), attempt = step + 1, ?delay, "Resource still reachable");
                thread::sleep(delay);
            }
        }

        Err(ResourceNotCollected {
            id: observation.id(),
            label: observation.label().to_string(),
            attempts,
        })
    }

    /// Await every observation in registration order, collecting all failures.
    #[must_use]
    pub fn await_all(&self, policy: &AwaitPolicy) -> Vec<ResourceNotCollected> {
        self.observations
            .values()
            .filter_map(|observation| self.await_cleared(observation, policy).err())
            .collect()
    }
}

impl fmt::Debug for WeakResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakResourceRegistry")
            .field("observations", &self.observations)
            .finish_non_exhaustive()
    }
}
