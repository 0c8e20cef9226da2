// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task infrastructure and the pool's periodic tasks
//!
//! The [`Driver`] owns a set of long-running tokio tasks, each wrapping a
//! [`BackgroundTask`] implementation.  A task is activated on a fixed
//! period, on explicit [`Driver::wakeup`], or when one of its registered
//! dependency watchers changes.  Activations of one task never run
//! concurrently with each other.

use crate::manager::VifPoolManager;
use chrono::DateTime;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::FutureExt;
use futures::StreamExt;
use serde_json::json;
use slog::{debug, o, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

/// An operation driven on a recurring basis by the [`Driver`]
pub trait BackgroundTask: Send + Sync {
    /// Run one activation to completion, returning a serializable summary
    /// of what happened for the task's status.
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value>;
}

struct Task {
    status: watch::Receiver<TaskStatus>,
    tokio_task: tokio::task::JoinHandle<()>,
    notify: Arc<Notify>,
}

/// Drives the execution of registered background tasks
///
/// Dropping the driver aborts all of its tasks.
pub struct Driver {
    log: Logger,
    tasks: BTreeMap<TaskHandle, Task>,
}

/// Identifies a task registered with a [`Driver`]
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct TaskHandle(String);

impl Driver {
    pub fn new(log: &Logger) -> Driver {
        Driver { log: log.clone(), tasks: BTreeMap::new() }
    }

    /// Register a task to be activated every `period` and on demand.
    ///
    /// `watchers` are dependency channels; a change on any of them also
    /// activates the task.
    pub fn register(
        &mut self,
        name: String,
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        watchers: Vec<Box<dyn GenericWatcher>>,
    ) -> TaskHandle {
        let (status_tx, status_rx) =
            watch::channel(TaskStatus { current: None, last: None });
        let notify = Arc::new(Notify::new());

        let log = self.log.new(o!("background_task" => name.clone()));
        let task_exec =
            TaskExec::new(period, imp, Arc::clone(&notify), log, status_tx);
        let tokio_task = tokio::task::spawn(task_exec.run(watchers));

        let task = Task { status: status_rx, tokio_task, notify };
        if self.tasks.insert(TaskHandle(name.clone()), task).is_some() {
            panic!("started two background tasks called {:?}", name);
        }

        TaskHandle(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskHandle> {
        self.tasks.keys()
    }

    /// Activate the task as soon as possible, regardless of its period.
    ///
    /// If the task is currently running, another activation follows the
    /// current one.  Multiple pending wakeups coalesce.
    pub fn wakeup(&self, task: &TaskHandle) {
        // It should be hard to hit this in practice, since you'd have to
        // have gotten a TaskHandle from a different Driver instance.
        let task = self.tasks.get(task).unwrap_or_else(|| {
            panic!(
                "attempted to wake up non-existent background task: {:?}",
                task
            )
        });

        task.notify.notify_one();
    }

    pub fn status(&self, task: &TaskHandle) -> TaskStatus {
        let task = self.tasks.get(task).unwrap_or_else(|| {
            panic!(
                "attempted to get status of non-existent background task: \
                {:?}",
                task
            )
        });

        task.status.borrow().clone()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        for (_, t) in &self.tasks {
            t.tokio_task.abort();
        }
    }
}

struct TaskExec {
    period: Duration,
    imp: Box<dyn BackgroundTask>,
    notify: Arc<Notify>,
    log: Logger,
    status_tx: watch::Sender<TaskStatus>,
    iteration: u64,
}

impl TaskExec {
    fn new(
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        notify: Arc<Notify>,
        log: Logger,
        status_tx: watch::Sender<TaskStatus>,
    ) -> TaskExec {
        TaskExec { period, imp, notify, log, status_tx, iteration: 0 }
    }

    async fn run(mut self, mut deps: Vec<Box<dyn GenericWatcher>>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut dependencies: FuturesUnordered<_> =
                deps.iter_mut().map(|w| w.wait_for_change()).collect();

            tokio::select! {
                _ = interval.tick() => {
                    self.activate(ActivationReason::Timeout).await;
                },

                _ = self.notify.notified() => {
                    self.activate(ActivationReason::Signaled).await;
                }

                _ = dependencies.next(), if !dependencies.is_empty() => {
                    self.activate(ActivationReason::Dependency).await;
                }
            }
        }
    }

    async fn activate(&mut self, reason: ActivationReason) {
        self.iteration += 1;
        let iteration = self.iteration;
        let start_time = Utc::now();
        let start_instant = Instant::now();

        debug!(
            &self.log,
            "activating";
            "reason" => ?reason,
            "iteration" => iteration,
        );

        self.status_tx.send_modify(|status| {
            assert!(status.current.is_none());
            status.current = Some(LastStart {
                start_time,
                start_instant,
                reason,
                iteration,
            });
        });

        let value = self.imp.activate(&self.log).await;

        let elapsed = start_instant.elapsed();

        self.status_tx.send_modify(|status| {
            assert!(status.current.is_some());
            let current = status.current.as_ref().unwrap();
            assert_eq!(current.iteration, iteration);
            *status = TaskStatus {
                current: None,
                last: Some(LastResult {
                    iteration,
                    start_time: current.start_time,
                    elapsed,
                    value,
                }),
            };
        });

        debug!(
            &self.log,
            "activation complete";
            "elapsed" => ?elapsed,
            "iteration" => iteration,
        );
    }
}

/// Why a background task was activated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationReason {
    Signaled,
    Timeout,
    Dependency,
}

/// Describes the runtime status of a background task
#[derive(Clone, Debug)]
pub struct TaskStatus {
    /// the currently running activation, if any
    pub current: Option<LastStart>,
    /// the most recently completed activation, if any
    pub last: Option<LastResult>,
}

#[derive(Clone, Debug)]
pub struct LastStart {
    pub start_time: DateTime<Utc>,
    pub start_instant: Instant,
    pub reason: ActivationReason,
    pub iteration: u64,
}

#[derive(Clone, Debug)]
pub struct LastResult {
    pub iteration: u64,
    pub start_time: DateTime<Utc>,
    pub elapsed: Duration,
    /// summary returned by the task's last activation
    pub value: serde_json::Value,
}

/// Dependency channel a task can be activated by, type-erased
pub trait GenericWatcher: Send {
    fn wait_for_change(
        &mut self,
    ) -> BoxFuture<'_, Result<(), watch::error::RecvError>>;
}

impl<T: Send + Sync> GenericWatcher for watch::Receiver<T> {
    fn wait_for_change(
        &mut self,
    ) -> BoxFuture<'_, Result<(), watch::error::RecvError>> {
        async { self.changed().await }.boxed()
    }
}

/// Background task running the pool's recycling pass
///
/// Every activation processes the current recyclable set once; see
/// [`VifPoolManager::return_ports_to_pool`].
pub struct PoolMaintenance {
    pool: VifPoolManager,
}

impl PoolMaintenance {
    pub fn new(pool: VifPoolManager) -> PoolMaintenance {
        PoolMaintenance { pool }
    }
}

impl BackgroundTask for PoolMaintenance {
    fn activate<'a>(
        &'a mut self,
        _log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        async {
            let stats = self.pool.return_ports_to_pool().await;
            json!({
                "recycled": stats.recycled,
                "deleted": stats.deleted,
                "dropped": stats.dropped,
                "failed": stats.failed,
            })
        }
        .boxed()
    }
}
