use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use bridge_core::Task;

use crate::db::BridgeRocksDB;

use super::QueueResult;

/// Storage backend of the task queue.
///
/// A popped task is owned by the worker that popped it until it is either
/// acknowledged or rescheduled.
pub trait TaskBroker: Send + Sync + Debug {
    /// Schedule a new task
    fn push(&self, task: Task) -> QueueResult<()>;

    /// Take the earliest task whose eta is at or before `now`
    fn pop_due(&self, now: DateTime<Utc>) -> QueueResult<Option<Task>>;

    /// Forget a finished task
    fn ack(&self, id: &Uuid) -> QueueResult<()>;

    /// Put a popped task back with its updated eta and retry count
    fn reschedule(&self, task: Task) -> QueueResult<()>;

    /// Number of scheduled tasks, excluding those being processed
    fn len(&self) -> usize;

    /// Whether nothing is scheduled
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The earliest scheduled eta
    fn next_eta(&self) -> Option<DateTime<Utc>>;
}

/// Tasks ordered by eta. Ties are broken by id.
#[derive(Debug, Default)]
struct Schedule {
    by_eta: BTreeMap<(DateTime<Utc>, Uuid), Task>,
    eta_by_id: HashMap<Uuid, DateTime<Utc>>,
}

impl Schedule {
    fn insert(&mut self, task: Task) {
        if let Some(previous) = self.eta_by_id.insert(task.id, task.eta) {
            self.by_eta.remove(&(previous, task.id));
        }
        self.by_eta.insert((task.eta, task.id), task);
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<Task> {
        let key = *self.by_eta.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.eta_by_id.remove(&key.1);
        self.by_eta.remove(&key)
    }

    fn remove(&mut self, id: &Uuid) {
        if let Some(eta) = self.eta_by_id.remove(id) {
            self.by_eta.remove(&(eta, *id));
        }
    }

    fn len(&self) -> usize {
        self.by_eta.len()
    }

    fn next_eta(&self) -> Option<DateTime<Utc>> {
        self.by_eta.keys().next().map(|(eta, _)| *eta)
    }
}

/// A broker that keeps everything in memory. Tasks are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTaskBroker(Mutex<Schedule>);

impl TaskBroker for MemoryTaskBroker {
    fn push(&self, task: Task) -> QueueResult<()> {
        self.0.lock().insert(task);
        Ok(())
    }

    fn pop_due(&self, now: DateTime<Utc>) -> QueueResult<Option<Task>> {
        Ok(self.0.lock().pop_due(now))
    }

    fn ack(&self, id: &Uuid) -> QueueResult<()> {
        self.0.lock().remove(id);
        Ok(())
    }

    fn reschedule(&self, task: Task) -> QueueResult<()> {
        self.push(task)
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn next_eta(&self) -> Option<DateTime<Utc>> {
        self.0.lock().next_eta()
    }
}

/// A broker persisting every task in rocksdb until it is acknowledged.
///
/// Tasks that were popped but never acknowledged before a restart are
/// delivered again.
#[derive(Debug)]
pub struct RocksTaskBroker {
    db: BridgeRocksDB,
    schedule: Mutex<Schedule>,
}

impl RocksTaskBroker {
    /// Open the broker, reloading every persisted task into the schedule
    pub fn open(db: BridgeRocksDB) -> QueueResult<Self> {
        let mut schedule = Schedule::default();
        let pending = db.retrieve_pending_tasks()?;
        info!(pending = pending.len(), "Reloaded persisted tasks");
        for task in pending {
            schedule.insert(task);
        }
        Ok(Self {
            db,
            schedule: Mutex::new(schedule),
        })
    }
}

impl TaskBroker for RocksTaskBroker {
    fn push(&self, task: Task) -> QueueResult<()> {
        self.db.store_task(&task)?;
        debug!(id = %task.id, task = %task.name(), eta = %task.eta, "Task persisted");
        self.schedule.lock().insert(task);
        Ok(())
    }

    fn pop_due(&self, now: DateTime<Utc>) -> QueueResult<Option<Task>> {
        Ok(self.schedule.lock().pop_due(now))
    }

    fn ack(&self, id: &Uuid) -> QueueResult<()> {
        self.db.delete_task(id)?;
        self.schedule.lock().remove(id);
        Ok(())
    }

    fn reschedule(&self, task: Task) -> QueueResult<()> {
        self.push(task)
    }

    fn len(&self) -> usize {
        self.schedule.lock().len()
    }

    fn next_eta(&self) -> Option<DateTime<Utc>> {
        self.schedule.lock().next_eta()
    }
}
