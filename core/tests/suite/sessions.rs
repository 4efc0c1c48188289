//! Session-level properties of the leak auditor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use leakwatch_core::{
    AllowlistRule, AuditError, AwaitPolicy, Backoff, FnAssist, LeakAuditor, LeakFailure,
    SessionPhase, ThreadGroup,
};

use crate::common::{Parked, fast_auditor, ns};

#[test]
fn empty_session_passes() {
    let group = ThreadGroup::new("empty");
    let mut auditor = fast_auditor(&group).build();

    auditor.begin().unwrap();
    let summary = auditor.end().expect("clean session");

    assert_eq!(summary.resources_cleared, 0);
    assert!(summary.allowlisted.is_empty());
}

/// Baseline {T1}; R1 registered and dropped; no threads spawned.
#[test]
fn dropped_resource_with_preexisting_thread_passes() {
    let group = ThreadGroup::new("baseline-t1");
    let t1 = Parked::spawn(&group, "main-loop", "t1");

    let mut auditor = fast_auditor(&group).build();
    auditor.begin().unwrap();
    assert_eq!(auditor.baseline().map(|b| b.len()), Some(1));

    let r1 = Arc::new(vec![1_u8, 2, 3]);
    auditor.register_labeled(&r1, "R1").unwrap();
    drop(r1);

    let summary = auditor.end().expect("clean session");
    assert_eq!(summary.resources_cleared, 1);
    assert!(summary.allowlisted.is_empty());

    t1.release();
}

/// Baseline {T1}; T2 ("worker", not allowlisted) spawned and not joined.
#[test]
fn unjoined_worker_is_reported_as_thread_leak() {
    let group = ThreadGroup::new("baseline-t2");
    let t1 = Parked::spawn(&group, "main-loop", "t1");

    let mut auditor = fast_auditor(&group).thread_grace_attempts(0).build();
    auditor.begin().unwrap();

    let t2 = Parked::spawn(&group, "worker", "t2");

    let err = auditor.end().unwrap_err();
    let report = err.leak_report().expect("leak report");
    assert_eq!(report.failures().len(), 1);
    let LeakFailure::UnexpectedThreadLeak { threads } = &report.failures()[0] else {
        panic!("expected thread leak, got {:?}", report.failures()[0]);
    };
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].namespace().as_str(), "worker");
    assert_eq!(threads[0].name(), Some("t2"));

    t2.release();
    t1.release();
}

#[test]
fn retained_resource_is_reported_by_id() {
    let group = ThreadGroup::new("retained");
    let mut auditor = fast_auditor(&group).build();
    auditor.begin().unwrap();

    let released = Arc::new(1_u32);
    let retained = Arc::new(2_u32);
    auditor.register_labeled(&released, "released").unwrap();
    let retained_id = auditor.register_labeled(&retained, "retained").unwrap();
    drop(released);

    let err = auditor.end().unwrap_err();
    let report = err.leak_report().expect("leak report");
    let failures: Vec<_> = report.not_collected().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, retained_id);
    assert_eq!(failures[0].label, "retained");
    assert_eq!(failures[0].attempts, 5);
    assert_eq!(report.leaked_threads().count(), 0);

    // Still alive: the auditor never held a strong reference it could drop.
    assert_eq!(Arc::strong_count(&retained), 1);
}

#[test]
fn allowlisted_thread_is_excused() {
    let group = ThreadGroup::new("allowlisted");
    let mut auditor = fast_auditor(&group)
        .allow(AllowlistRule::namespace(ns("background-compilation")))
        .build();
    auditor.begin().unwrap();

    let compiler = Parked::spawn(&group, "background-compilation", "compiler-0");

    let summary = auditor.end().expect("allowlisted thread is not a leak");
    assert_eq!(summary.allowlisted.len(), 1);
    assert_eq!(summary.allowlisted[0].name(), Some("compiler-0"));

    compiler.release();
}

#[test]
fn custom_rule_excuses_only_matching_threads() {
    let group = ThreadGroup::new("custom-rule");
    let mut auditor = fast_auditor(&group)
        .thread_grace_attempts(0)
        .allow(AllowlistRule::custom("maintenance threads", |identity| {
            identity.name().is_some_and(|name| name.ends_with("-maintenance"))
        }))
        .build();
    auditor.begin().unwrap();

    let sweeper = Parked::spawn(&group, "engine", "engine-maintenance");
    let stray = Parked::spawn(&group, "engine", "engine-stray");

    let err = auditor.end().unwrap_err();
    let leaked: Vec<_> = err.leak_report().unwrap().leaked_threads().cloned().collect();
    assert_eq!(leaked.len(), 1);
    assert_eq!(leaked[0].name(), Some("engine-stray"));

    stray.release();
    sweeper.release();
}

#[test]
fn second_end_is_invalid_state() {
    let group = ThreadGroup::new("double-end");
    let mut auditor = fast_auditor(&group).build();
    auditor.begin().unwrap();
    auditor.end().unwrap();

    let err = auditor.end().unwrap_err();
    assert!(matches!(
        err,
        AuditError::InvalidState {
            operation: "end",
            phase: SessionPhase::Closed
        }
    ));
}

#[test]
fn failed_session_still_closes() {
    let group = ThreadGroup::new("closes");
    let mut auditor = fast_auditor(&group).build();
    auditor.begin().unwrap();

    let kept = Arc::new(());
    auditor.register(&kept).unwrap();
    assert!(auditor.end().is_err());

    assert_eq!(auditor.phase(), SessionPhase::Closed);
    assert_eq!(auditor.registered_count(), 0);
    assert!(auditor.end().unwrap_err().is_invalid_state());
}

#[test]
fn collection_assist_runs_before_every_poll() {
    let group = ThreadGroup::new("assist");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut auditor = LeakAuditor::builder(group.clone())
        .await_policy(AwaitPolicy {
            max_attempts: 3,
            backoff: Backoff::immediate(),
        })
        .collection_assist(FnAssist::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .build();
    auditor.begin().unwrap();

    let kept = Arc::new(());
    let dropped = Arc::new(());
    auditor.register(&kept).unwrap();
    auditor.register(&dropped).unwrap();
    drop(dropped);

    assert!(auditor.end().is_err());
    // 3 polls for the retained resource, 1 for the released one.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn grace_window_absorbs_exiting_thread() {
    let group = ThreadGroup::new("grace");
    let mut auditor = fast_auditor(&group).thread_grace_attempts(10).build();
    auditor.begin().unwrap();

    let exiting = group
        .spawn(ns("worker"), "short-lived", || {
            thread::sleep(Duration::from_millis(15));
        })
        .unwrap();

    auditor.end().expect("thread exits within the grace window");
    exiting.join().unwrap();
}

#[test]
fn sessions_on_separate_groups_do_not_interfere() {
    let group_a = ThreadGroup::new("a");
    let group_b = ThreadGroup::new("b");
    let mut auditor_a = fast_auditor(&group_a).thread_grace_attempts(0).build();
    let mut auditor_b = fast_auditor(&group_b).thread_grace_attempts(0).build();
    auditor_a.begin().unwrap();
    auditor_b.begin().unwrap();

    let only_in_b = Parked::spawn(&group_b, "worker", "b-worker");

    auditor_a.end().expect("group a saw nothing new");
    let err = auditor_b.end().unwrap_err();
    assert_eq!(err.leak_report().unwrap().leaked_threads().count(), 1);

    only_in_b.release();
}
