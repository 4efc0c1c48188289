//! Shared test fixtures.
//!
//! [`FixtureEngine`] stands in for a managed runtime: it spawns worker
//! threads through a [`ThreadGroup`], and each worker holds a strong handle
//! to the engine until shutdown, the way a real engine's threads keep it
//! alive.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use leakwatch_core::{
    AllowlistRule, AwaitPolicy, Backoff, LeakAuditor, LeakAuditorBuilder, Namespace, ThreadGroup,
    ThreadScope,
};

pub fn ns(label: &str) -> Namespace {
    Namespace::new(label).expect("valid namespace")
}

/// Auditor builder with short, deterministic bounds for tests.
pub fn fast_auditor(group: &ThreadGroup) -> LeakAuditorBuilder {
    fast_builder(group.clone())
}

pub fn fast_builder(scope: impl ThreadScope + 'static) -> LeakAuditorBuilder {
    leakwatch_core::init_test_logging();
    LeakAuditor::builder(scope)
        .await_policy(AwaitPolicy {
            max_attempts: 5,
            backoff: Backoff {
                initial_delay: Duration::from_millis(2),
                max_delay: Duration::from_millis(20),
                jitter_factor: 0.0,
            },
        })
        .thread_grace_attempts(5)
}

/// Excuses every thread whose name doesn't start with `prefix`.
///
/// Process-wide censuses see every test running in this binary; this keeps a
/// test's verdict about its own threads.
pub fn outside(prefix: &'static str) -> AllowlistRule {
    AllowlistRule::custom(format!("threads outside {prefix:?}"), move |identity| {
        !identity.name_starts_with(prefix)
    })
}

pub struct FixtureEngine {
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FixtureEngine {
    pub fn start(group: &ThreadGroup, worker_count: usize) -> Arc<Self> {
        let engine = Arc::new(Self {
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        });

        let handles = (0..worker_count)
            .map(|index| {
                let worker = Arc::clone(&engine);
                group
                    .spawn(ns("worker"), format!("worker-{index}"), move || worker.run())
                    .expect("spawn worker")
            })
            .collect();
        *engine.workers.lock().expect("workers lock") = handles;
        engine
    }

    fn run(&self) {
        while !self.shutdown.load(Ordering::Acquire) {
            thread::park_timeout(Duration::from_millis(2));
        }
    }

    /// Stop and join every worker, releasing their engine handles.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.workers.lock().expect("workers lock"));
        for handle in handles {
            handle.thread().unpark();
            handle.join().expect("worker panicked");
        }
    }
}

/// A plain std thread, outside any group, parked until released.
pub struct OsParked {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl OsParked {
    pub fn spawn(name: &str) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = ready_tx.send(());
                let _ = stop_rx.recv();
            })
            .expect("spawn os thread");
        // The kernel name is set by the new thread itself.
        ready_rx.recv().expect("os thread started");
        Self { stop, handle }
    }

    pub fn release(self) {
        let _ = self.stop.send(());
        self.handle.join().expect("os thread panicked");
    }
}

/// A thread parked until its [`Parked::release`] is called.
pub struct Parked {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Parked {
    pub fn spawn(group: &ThreadGroup, namespace: &str, name: &str) -> Self {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = group
            .spawn(ns(namespace), name, move || {
                let _ = stop_rx.recv();
            })
            .expect("spawn parked thread");
        Self { stop, handle }
    }

    pub fn release(self) {
        let _ = self.stop.send(());
        self.handle.join().expect("parked thread panicked");
    }
}
