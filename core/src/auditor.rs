//! Leak-audit sessions.
//!
//! A [`LeakAuditor`] moves through three phases:
//!
//! ```text
//! Idle --begin()--> Open --end()--> Closed
//!                    |  ^
//!                    register()
//! ```
//!
//! `begin` captures the baseline census before anything is registered.
//! `end` verifies every registered resource is released and that no thread
//! outside the baseline and the allowlist is still alive, then discards the
//! session whatever the outcome. Misuse (`register` or `end` outside `Open`,
//! `begin` twice) fails fast with [`AuditError::InvalidState`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use leakwatch_config::{AuditConfig, ConfigError};
use leakwatch_types::{
    Allowlist, AllowlistRule, Census, CensusError, LeakFailure, LeakReport, ResourceId,
    SessionId, ThreadIdentity,
};
use leakwatch_utils::{Backoff, write_report};

use crate::census;
use crate::registry::{AwaitPolicy, CollectionAssist, WeakResourceRegistry, YieldAssist};
use crate::scope::ThreadScope;

const DEFAULT_THREAD_GRACE_ATTEMPTS: u32 = 3;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Open,
    Closed,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot {operation} while the audit session is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error("baseline thread census failed: {0}")]
    Census(#[from] CensusError),
    #[error(transparent)]
    Leaks(#[from] LeakReport),
}

impl AuditError {
    #[must_use]
    pub fn leak_report(&self) -> Option<&LeakReport> {
        match self {
            Self::Leaks(report) => Some(report),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Outcome of a clean teardown.
#[derive(Debug, Clone)]
pub struct AuditSummary {
    pub session: SessionId,
    /// Registered resources confirmed released.
    pub resources_cleared: usize,
    /// New threads excused by an allowlist rule.
    pub allowlisted: Vec<ThreadIdentity>,
    pub elapsed: Duration,
}

struct Session {
    id: SessionId,
    baseline: Census,
    registry: WeakResourceRegistry,
    started: Instant,
}

enum State {
    Idle,
    Open(Session),
    Closed,
}

impl State {
    fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Open(_) => SessionPhase::Open,
            Self::Closed => SessionPhase::Closed,
        }
    }
}

struct ThreadVerdict {
    allowlisted: Vec<ThreadIdentity>,
    leaked: Vec<ThreadIdentity>,
}

pub struct LeakAuditor {
    scope: Arc<dyn ThreadScope>,
    allowlist: Allowlist,
    policy: AwaitPolicy,
    thread_grace_attempts: u32,
    assist: Arc<dyn CollectionAssist>,
    report_dir: Option<PathBuf>,
    state: State,
}

impl LeakAuditor {
    /// Auditor with default bounds and no allowlist.
    pub fn new(scope: impl ThreadScope + 'static) -> Self {
        Self::builder(scope).build()
    }

    pub fn builder(scope: impl ThreadScope + 'static) -> LeakAuditorBuilder {
        LeakAuditorBuilder::new(Arc::new(scope))
    }

    /// Builder seeded from a loaded [`AuditConfig`].
    pub fn builder_from_config(
        scope: impl ThreadScope + 'static,
        config: &AuditConfig,
    ) -> Result<LeakAuditorBuilder, ConfigError> {
        let mut builder = Self::builder(scope).allow_all(config.allowlist_rules()?);

        if let Some(session) = &config.session {
            let defaults = AwaitPolicy::default();
            let backoff = Backoff {
                initial_delay: session
                    .initial_backoff_ms
                    .map_or(defaults.backoff.initial_delay, Duration::from_millis),
                max_delay: session
                    .max_backoff_ms
                    .map_or(defaults.backoff.max_delay, Duration::from_millis),
                jitter_factor: session.jitter()?.unwrap_or(defaults.backoff.jitter_factor),
            };
            builder = builder.await_policy(AwaitPolicy {
                max_attempts: session.max_attempts.unwrap_or(defaults.max_attempts),
                backoff,
            });
            if let Some(grace) = session.thread_grace_attempts {
                builder = builder.thread_grace_attempts(grace);
            }
        }

        if let Some(dir) = config.report_dir() {
            builder = builder.report_dir(dir);
        }
        Ok(builder)
    }

    /// Auditor configured from `$LEAKWATCH_CONFIG` or `~/.leakwatch/config.toml`.
    pub fn from_default_config(scope: impl ThreadScope + 'static) -> Result<Self, ConfigError> {
        let config = AuditConfig::load_or_default()?;
        Ok(Self::builder_from_config(scope, &config)?.build())
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    #[must_use]
    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    #[must_use]
    pub fn await_policy(&self) -> &AwaitPolicy {
        &self.policy
    }

    /// Baseline of the open session.
    #[must_use]
    pub fn baseline(&self) -> Option<&Census> {
        match &self.state {
            State::Open(session) => Some(&session.baseline),
            _ => None,
        }
    }

    /// Resources registered in the open session (zero otherwise).
    #[must_use]
    pub fn registered_count(&self) -> usize {
        match &self.state {
            State::Open(session) => session.registry.len(),
            _ => 0,
        }
    }

    /// Open the session: capture the baseline census.
    ///
    /// On census failure the auditor stays idle and `begin` may be retried.
    pub fn begin(&mut self) -> Result<SessionId, AuditError> {
        if !matches!(self.state, State::Idle) {
            return Err(self.invalid("begin"));
        }

        let baseline = census::capture(&*self.scope)?;
        let id = SessionId::new(NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        info!(
            session = %id,
            scope = %self.scope.describe(),
            baseline_threads = baseline.len(),
            "Leak audit session started"
        );

        self.state = State::Open(Session {
            id,
            baseline,
            registry: WeakResourceRegistry::new(Arc::clone(&self.assist)),
            started: Instant::now(),
        });
        Ok(id)
    }

    /// Track `resource`, labelled with its type name.
    pub fn register<T>(&mut self, resource: &Arc<T>) -> Result<ResourceId, AuditError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_labeled(resource, std::any::type_name::<T>())
    }

    pub fn register_labeled<T>(
        &mut self,
        resource: &Arc<T>,
        label: impl Into<String>,
    ) -> Result<ResourceId, AuditError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match &mut self.state {
            State::Open(session) => Ok(session.registry.observe(resource, label)),
            _ => Err(self.invalid("register")),
        }
    }

    /// Close the session and deliver the verdict.
    ///
    /// Every check runs even after a failure; all failures come back together
    /// in one [`LeakReport`]. The session is discarded either way.
    pub fn end(&mut self) -> Result<AuditSummary, AuditError> {
        let session = match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(session) => session,
            other => {
                self.state = other;
                return Err(self.invalid("end"));
            }
        };

        let mut failures = Vec::new();

        let not_collected = session.registry.await_all(&self.policy);
        let resources_cleared = session.registry.len() - not_collected.len();
        for failure in not_collected {
            warn!(session = %session.id, "{failure}");
            failures.push(LeakFailure::ResourceNotCollected(failure));
        }

        let allowlisted = match self.unexpected_threads(&session.baseline) {
            Ok(verdict) => {
                for identity in &verdict.allowlisted {
                    debug!(session = %session.id, thread = %identity, "Allowlisted thread survived session");
                }
                if !verdict.leaked.is_empty() {
                    for identity in &verdict.leaked {
                        warn!(session = %session.id, thread = %identity, "Thread leaked past session end");
                    }
                    failures.push(LeakFailure::UnexpectedThreadLeak {
                        threads: verdict.leaked,
                    });
                }
                verdict.allowlisted
            }
            Err(err) => {
                warn!(session = %session.id, "Teardown census failed: {err}");
                failures.push(LeakFailure::CensusUnavailable {
                    reason: err.to_string(),
                });
                Vec::new()
            }
        };

        let id = session.id;
        let elapsed = session.started.elapsed();
        drop(session);

        match LeakReport::from_failures(id, failures) {
            None => {
                info!(session = %id, resources_cleared, ?elapsed, "Leak audit session passed");
                Ok(AuditSummary {
                    session: id,
                    resources_cleared,
                    allowlisted,
                    elapsed,
                })
            }
            Some(report) => {
                warn!(
                    session = %id,
                    failures = report.failures().len(),
                    ?elapsed,
                    "Leak audit session failed"
                );
                self.persist_report(&report);
                Err(AuditError::Leaks(report))
            }
        }
    }

    /// New threads since `baseline`, split by the allowlist.
    ///
    /// While unexpected threads remain, re-captures up to the grace bound so
    /// threads that are mid-exit get a chance to finish.
    fn unexpected_threads(&self, baseline: &Census) -> Result<ThreadVerdict, CensusError> {
        let mut step = 0;
        loop {
            let current = census::capture(&*self.scope)?;
            let (allowlisted, leaked) = self.allowlist.partition(census::diff(baseline, &current));
            if leaked.is_empty() || step >= self.thread_grace_attempts {
                return Ok(ThreadVerdict {
                    allowlisted,
                    leaked,
                });
            }
            let delay = self.policy.backoff.delay(step);
            debug!(
                remaining = leaked.len(),
                attempt = step + 1,
                ?delay,
                "Waiting for new threads to exit"
            );
            thread::sleep(delay);
            step += 1;
        }
    }

    fn persist_report(&self, report: &LeakReport) {
        let Some(dir) = &self.report_dir else {
            return;
        };
        let bytes = match serde_json::to_vec_pretty(report) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to serialize leak report: {err}");
                return;
            }
        };
        let file_name = format!("leak-report-{}-{}.json", std::process::id(), report.session());
        match write_report(dir, &file_name, &bytes) {
            Ok(path) => info!(path = %path.display(), "Leak report written"),
            Err(err) => warn!(dir = %dir.display(), "Failed to write leak report: {err}"),
        }
    }

    fn invalid(&self, operation: &'static str) -> AuditError {
        AuditError::InvalidState {
            operation,
            phase: self.state.phase(),
        }
    }
}

impl Drop for LeakAuditor {
    fn drop(&mut self) {
        if let State::Open(session) = &self.state
            && !thread::panicking()
        {
            warn!(
                session = %session.id,
                registered = session.registry.len(),
                "Leak audit session dropped without end(); nothing was verified"
            );
        }
    }
}

impl fmt::Debug for LeakAuditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakAuditor")
            .field("scope", &self.scope.describe())
            .field("phase", &self.phase())
            .field("allowlist", &self.allowlist)
            .field("policy", &self.policy)
            .field("thread_grace_attempts", &self.thread_grace_attempts)
            .field("report_dir", &self.report_dir)
            .finish_non_exhaustive()
    }
}

pub struct LeakAuditorBuilder {
    scope: Arc<dyn ThreadScope>,
    allowlist: Allowlist,
    policy: AwaitPolicy,
    thread_grace_attempts: u32,
    assist: Arc<dyn CollectionAssist>,
    report_dir: Option<PathBuf>,
}

impl fmt::Debug for LeakAuditorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakAuditorBuilder")
            .field("scope", &self.scope.describe())
            .field("allowlist", &self.allowlist)
            .field("policy", &self.policy)
            .field("thread_grace_attempts", &self.thread_grace_attempts)
            .field("report_dir", &self.report_dir)
            .finish_non_exhaustive()
    }
}

impl LeakAuditorBuilder {
    fn new(scope: Arc<dyn ThreadScope>) -> Self {
        Self {
            scope,
            allowlist: Allowlist::default(),
            policy: AwaitPolicy::default(),
            thread_grace_attempts: DEFAULT_THREAD_GRACE_ATTEMPTS,
            assist: Arc::new(YieldAssist),
            report_dir: None,
        }
    }

    /// Append one allowlist rule. Rules are checked in insertion order.
    pub fn allow(mut self, rule: AllowlistRule) -> Self {
        self.allowlist.push(rule);
        self
    }

    pub fn allow_all(mut self, rules: impl IntoIterator<Item = AllowlistRule>) -> Self {
        for rule in rules {
            self.allowlist.push(rule);
        }
        self
    }

    pub fn await_policy(mut self, policy: AwaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Extra census captures while unexpected threads remain. Zero disables
    /// the grace window.
    pub fn thread_grace_attempts(mut self, attempts: u32) -> Self {
        self.thread_grace_attempts = attempts;
        self
    }

    pub fn collection_assist(mut self, assist: impl CollectionAssist + 'static) -> Self {
        self.assist = Arc::new(assist);
        self
    }

    /// Write a JSON report here whenever a session fails.
    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn build(self) -> LeakAuditor {
        LeakAuditor {
            scope: self.scope,
            allowlist: self.allowlist,
            policy: self.policy,
            thread_grace_attempts: self.thread_grace_attempts,
            assist: self.assist,
            report_dir: self.report_dir,
            state: State::Idle,
        }
    }
}
