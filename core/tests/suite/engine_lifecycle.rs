//! Auditing a fixture engine whose worker threads hold the engine alive.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use leakwatch_core::{AllowlistRule, AwaitPolicy, Backoff, LeakFailure, ThreadGroup};

use crate::common::{FixtureEngine, Parked, fast_auditor};

#[test]
fn closed_engine_passes_audit() {
    let group = ThreadGroup::new("engine-closed");
    let mut auditor = fast_auditor(&group).build();
    auditor.begin().unwrap();

    let engine = FixtureEngine::start(&group, 3);
    auditor.register_labeled(&engine, "engine").unwrap();
    assert_eq!(group.live_count(), 3);

    engine.close();
    drop(engine);

    let summary = auditor.end().expect("engine and workers released");
    assert_eq!(summary.resources_cleared, 1);
}

#[test]
fn engine_closed_on_another_thread_is_awaited() {
    let group = ThreadGroup::new("engine-deferred");
    let mut auditor = fast_auditor(&group)
        .await_policy(AwaitPolicy {
            max_attempts: 20,
            backoff: Backoff::default(),
        })
        .build();
    auditor.begin().unwrap();

    let engine = FixtureEngine::start(&group, 2);
    auditor.register_labeled(&engine, "engine").unwrap();

    // The caller hands its only handle to a closer and does not wait for it;
    // the workers keep the engine reachable until they have been joined.
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        engine.close();
    });

    auditor.end().expect("engine released within the retry budget");
    closer.join().unwrap();
}

#[test]
fn unclosed_engine_reports_handle_and_workers_together() {
    let group = ThreadGroup::new("engine-leak");
    let mut auditor = fast_auditor(&group).thread_grace_attempts(0).build();
    auditor.begin().unwrap();

    let engine = FixtureEngine::start(&group, 2);
    let engine_id = auditor.register_labeled(&engine, "engine").unwrap();
    // Keep a weak handle only, so cleanup below is possible without the test
    // itself retaining the engine during the audit.
    let cleanup = Arc::downgrade(&engine);
    drop(engine);

    let err = auditor.end().unwrap_err();
    let report = err.leak_report().expect("leak report");
    assert_eq!(report.failures().len(), 2);
    assert!(matches!(
        &report.failures()[0],
        LeakFailure::ResourceNotCollected(failure) if failure.id == engine_id
    ));
    let mut leaked: Vec<_> = report
        .leaked_threads()
        .filter_map(|t| t.name().map(str::to_string))
        .collect();
    leaked.sort();
    assert_eq!(leaked, vec!["worker-0", "worker-1"]);

    cleanup.upgrade().expect("workers keep engine alive").close();
    assert!(cleanup.upgrade().is_none());
}

#[test]
fn background_maintenance_thread_outliving_engine_is_allowlisted() {
    let group = ThreadGroup::new("engine-maintenance");
    let mut auditor = fast_auditor(&group)
        .allow(AllowlistRule::prefix("background"))
        .build();
    auditor.begin().unwrap();

    let engine = FixtureEngine::start(&group, 1);
    let maintenance = Parked::spawn(&group, "background-compilation", "compiler-0");
    auditor.register_labeled(&engine, "engine").unwrap();
    engine.close();
    drop(engine);

    let summary = auditor.end().expect("only allowlisted threads survive");
    assert_eq!(summary.resources_cleared, 1);
    assert_eq!(summary.allowlisted.len(), 1);
    assert_eq!(summary.allowlisted[0].namespace().as_str(), "background-compilation");

    maintenance.release();
}
