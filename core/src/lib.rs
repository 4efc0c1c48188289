//! Leak auditing for engine-like resources and the threads they spawn.
//!
//! A [`LeakAuditor`] session takes a baseline [`Census`] of a [`ThreadScope`],
//! tracks registered resources through weak observations, and at teardown
//! reports every resource that stayed reachable and every new thread outside
//! the allowlist:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use leakwatch_core::{LeakAuditor, ThreadGroup};
//!
//! let group = ThreadGroup::new("engine-test");
//! let mut auditor = LeakAuditor::new(group.clone());
//! auditor.begin()?;
//!
//! let engine = Arc::new(());
//! auditor.register(&engine)?;
//! drop(engine);
//!
//! auditor.end()?;
//! # Ok::<(), leakwatch_core::AuditError>(())
//! ```

pub mod auditor;
pub mod census;
pub mod logging;
pub mod registry;
pub mod scope;

pub use auditor::{AuditError, AuditSummary, LeakAuditor, LeakAuditorBuilder, SessionPhase};
pub use leakwatch_types::{
    Allowlist, AllowlistRule, Census, CensusError, LeakFailure, LeakReport, Namespace,
    ResourceId, ResourceNotCollected, SessionId, ThreadIdentity, ThreadKey,
};
pub use leakwatch_utils::Backoff;
pub use logging::init_test_logging;
pub use registry::{
    AwaitPolicy, CollectionAssist, FnAssist, WeakObservation, WeakResourceRegistry, YieldAssist,
};
pub use scope::{ProcessScope, ThreadGroup, ThreadScope};
