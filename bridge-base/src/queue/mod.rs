//! A durable, delayed task queue with named handlers and a worker pool.
//!
//! Tasks are pushed with a delay and a retry budget, and are dispatched by
//! name to the handler registered for it. Handlers report a [`TaskOutcome`]:
//!
//! - `Success` acknowledges the task.
//! - `RetryAfter(d)` runs it again after `d` without consuming a retry.
//! - `Fail(e)` consumes a retry and runs it again after an exponential
//!   backoff. A task failing with no retry left is dropped.

use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{future::join_all, FutureExt};
use parking_lot::RwLock;
use prometheus::{IntCounterVec, IntGauge};
use serde::Deserialize;
use tokio::{sync::watch, sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use bridge_core::{Task, TaskName, TaskOutcome, TaskPayload};

use crate::{db::DbError, CoreMetrics};

pub use broker::*;

mod broker;
#[cfg(test)]
mod tests;

/// Upper bound of the failure backoff
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60 * 10);

/// Errors of the task queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No handler was registered for the task's name
    #[error("No handler registered for task {0}")]
    UnregisteredTask(TaskName),
    /// The broker's storage failed
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Task queue result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Something able to run tasks of one or more names
#[async_trait]
pub trait TaskHandler: Send + Sync + Debug {
    /// Run the task once
    async fn handle(&self, task: &Task) -> TaskOutcome;
}

/// Task queue worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskQueueConf {
    /// Number of concurrent workers
    pub workers: usize,
    /// Retry budget of tasks sent without an explicit one
    pub default_retry_count: u32,
    /// Seconds an idle worker waits before polling again
    pub idle_poll: u64,
    /// Seconds of the first failure backoff, doubled on every further failure
    pub retry_base: u64,
}

impl Default for TaskQueueConf {
    fn default() -> Self {
        Self {
            workers: 4,
            default_retry_count: 3,
            idle_poll: 1,
            retry_base: 5,
        }
    }
}

impl TaskQueueConf {
    /// Idle poll interval
    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll)
    }

    /// Backoff after the `attempts`-th failure
    pub fn retry_backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        Duration::from_secs(self.retry_base)
            .saturating_mul(1 << exp)
            .min(MAX_RETRY_BACKOFF)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// `now + delay`, saturating at the latest representable time
fn eta_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone)]
struct QueueMetrics {
    queue_length: IntGauge,
    processed: IntCounterVec,
}

/// The task queue shared by producers (listeners) and the worker pool.
#[derive(Debug)]
pub struct TaskQueue {
    broker: Arc<dyn TaskBroker>,
    handlers: RwLock<HashMap<TaskName, Arc<dyn TaskHandler>>>,
    notify: Notify,
    conf: TaskQueueConf,
    metrics: QueueMetrics,
}

impl TaskQueue {
    /// Create a queue over `broker`
    pub fn new(broker: Arc<dyn TaskBroker>, conf: TaskQueueConf, metrics: &CoreMetrics) -> Self {
        let metrics = QueueMetrics {
            queue_length: metrics.task_queue_length(),
            processed: metrics.tasks_processed_total(),
        };
        metrics.queue_length.set(broker.len() as i64);
        Self {
            broker,
            handlers: Default::default(),
            notify: Notify::new(),
            conf,
            metrics,
        }
    }

    /// Register the handler of `name`, replacing any previous one
    pub fn register_task(&self, name: TaskName, handler: Arc<dyn TaskHandler>) {
        debug!(task = %name, "Registering task handler");
        self.handlers.write().insert(name, handler);
    }

    /// Whether a handler is registered for `name`
    pub fn is_registered(&self, name: TaskName) -> bool {
        self.handlers.read().contains_key(&name)
    }

    /// The retry budget of tasks without a specific one
    pub fn default_retry_count(&self) -> u32 {
        self.conf.default_retry_count
    }

    /// Enqueue `payload` to run after `delay`
    #[instrument(skip(self, payload), fields(task = %payload.name()), level = "debug", err)]
    pub fn send_task(
        &self,
        payload: TaskPayload,
        delay: Duration,
        retry_count: u32,
    ) -> QueueResult<Uuid> {
        let name = payload.name();
        if !self.is_registered(name) {
            return Err(QueueError::UnregisteredTask(name));
        }
        let task = Task::new(payload, eta_after(Utc::now(), delay), retry_count);
        let id = task.id;
        self.broker.push(task)?;
        self.metrics.queue_length.set(self.broker.len() as i64);
        self.notify.notify_one();
        Ok(id)
    }

    /// Number of tasks scheduled
    pub fn len(&self) -> usize {
        self.broker.len()
    }

    /// Whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.broker.is_empty()
    }

    /// Spawn the worker pool. Every worker stops once `shutdown` turns true.
    pub fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let workers = self.conf.workers.max(1);
        let span = info_span!("TaskQueue", workers);
        tokio::spawn(
            async move {
                info!("Starting task queue workers");
                let handles = (0..workers)
                    .map(|worker| {
                        let queue = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(
                            queue
                                .run_worker(shutdown)
                                .instrument(info_span!("worker", worker)),
                        )
                    })
                    .collect::<Vec<_>>();
                for result in join_all(handles).await {
                    if let Err(err) = result {
                        error!(?err, "Task queue worker panicked");
                    }
                }
                info!("Task queue workers stopped");
            }
            .instrument(span),
        )
    }

    async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.broker.pop_due(Utc::now()) {
                Ok(Some(task)) => {
                    self.process(task).await;
                    self.metrics.queue_length.set(self.broker.len() as i64);
                    continue;
                }
                Ok(None) => {}
                Err(err) => warn!(?err, "Failed to pop a task from the broker"),
            }

            let wait = self.idle_wait(Utc::now());
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// How long an idle worker waits: until the next eta, but never longer than
    /// the idle poll interval
    fn idle_wait(&self, now: DateTime<Utc>) -> Duration {
        let idle_poll = self.conf.idle_poll();
        match self.broker.next_eta() {
            Some(eta) => (eta - now).to_std().unwrap_or_default().min(idle_poll),
            None => idle_poll,
        }
    }

    async fn process(&self, mut task: Task) {
        let name = task.name();
        let handler = self.handlers.read().get(&name).cloned();
        let Some(handler) = handler else {
            error!(id = %task.id, task = %name, "No handler registered, dropping task");
            self.record(name, "dropped");
            self.ack(&task);
            return;
        };

        let outcome = AssertUnwindSafe(
            handler
                .handle(&task)
                .instrument(info_span!("task", id = %task.id, task = %name)),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            TaskOutcome::Fail(eyre::eyre!("Task handler panicked: {}", panic_message(&*payload)))
        });
        self.record(name, outcome.label());

        match outcome {
            TaskOutcome::Success => {
                debug!(id = %task.id, task = %name, "Task succeeded");
                self.ack(&task);
            }
            TaskOutcome::RetryAfter(delay) => {
                debug!(id = %task.id, task = %name, ?delay, "Task asked to retry later");
                task.eta = eta_after(Utc::now(), delay);
                self.reschedule(task);
            }
            TaskOutcome::Fail(err) => {
                if task.retry_count == 0 {
                    error!(id = %task.id, task = %name, ?err, "Task failed with no retries left, dropping");
                    self.record(name, "dropped");
                    self.ack(&task);
                    return;
                }
                task.retry_count -= 1;
                task.attempts += 1;
                let backoff = self.conf.retry_backoff(task.attempts);
                warn!(
                    id = %task.id,
                    task = %name,
                    ?err,
                    retries_left = task.retry_count,
                    ?backoff,
                    "Task failed, retrying"
                );
                task.eta = eta_after(Utc::now(), backoff);
                self.reschedule(task);
            }
        }
    }

    fn record(&self, name: TaskName, outcome: &str) {
        self.metrics
            .processed
            .with_label_values(&[name.as_ref(), outcome])
            .inc();
    }

    fn ack(&self, task: &Task) {
        if let Err(err) = self.broker.ack(&task.id) {
            error!(id = %task.id, ?err, "Failed to acknowledge task");
        }
    }

    fn reschedule(&self, task: Task) {
        let id = task.id;
        if let Err(err) = self.broker.reschedule(task) {
            error!(%id, ?err, "Failed to reschedule task");
        }
        self.notify.notify_one();
    }
}
