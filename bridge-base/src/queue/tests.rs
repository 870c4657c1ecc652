use std::sync::atomic::{AtomicU32, Ordering};

use bridge_core::{BlockHeader, Logged, LogMeta, TopUpFeeEvent, H160, H256, U256};
use prometheus::Registry;
use tokio::sync::mpsc;

use crate::db::{test_utils::temp_db, BridgeRocksDB};

use super::*;

fn metrics() -> CoreMetrics {
    CoreMetrics::new("test", 0, Registry::new()).unwrap()
}

fn conf() -> TaskQueueConf {
    TaskQueueConf {
        workers: 2,
        default_retry_count: 3,
        idle_poll: 1,
        retry_base: 0,
    }
}

fn propose(height: u64) -> TaskPayload {
    TaskPayload::ProposeCheckpoint(BlockHeader::at_height(height, false))
}

fn top_up() -> TaskPayload {
    TaskPayload::TopUpFee(Logged::new(
        TopUpFeeEvent {
            user: H160::from_low_u64_be(1),
            fee: U256::from(1u64),
        },
        LogMeta::new(H160::zero(), 1, H256::from_low_u64_be(1), 0),
    ))
}

/// Replays a fixed script of outcomes, then succeeds.
#[derive(Debug)]
struct ScriptedHandler {
    calls: AtomicU32,
    script: Vec<fn() -> TaskOutcome>,
    done: Option<mpsc::UnboundedSender<Uuid>>,
}

impl ScriptedHandler {
    fn new(script: Vec<fn() -> TaskOutcome>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            script,
            done: None,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(&self, task: &Task) -> TaskOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        if let Some(done) = &self.done {
            let _ = done.send(task.id);
        }
        self.script
            .get(call)
            .map(|outcome| outcome())
            .unwrap_or(TaskOutcome::Success)
    }
}

fn always_fail() -> TaskOutcome {
    TaskOutcome::Fail(eyre::eyre!("rpc unavailable"))
}

fn panics() -> TaskOutcome {
    panic!("malformed payload")
}

fn retry_in_an_hour() -> TaskOutcome {
    TaskOutcome::RetryAfter(Duration::from_secs(3600))
}

fn far_future() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(365)
}

#[test]
fn unregistered_task_is_rejected_at_enqueue() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let queue = TaskQueue::new(broker.clone(), conf(), &metrics());

    let err = queue.send_task(top_up(), Duration::ZERO, 3).unwrap_err();
    assert!(matches!(err, QueueError::UnregisteredTask(TaskName::TopUpFee)));
    assert!(broker.is_empty());
}

#[test]
fn delayed_task_is_not_due_before_its_eta() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let queue = TaskQueue::new(broker.clone(), conf(), &metrics());
    queue.register_task(
        TaskName::ProposeCheckpoint,
        Arc::new(ScriptedHandler::new(vec![])),
    );

    queue
        .send_task(propose(1), Duration::from_secs(600), 3)
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert!(broker.pop_due(Utc::now()).unwrap().is_none());
    assert!(broker.pop_due(far_future()).unwrap().is_some());
}

#[test]
fn schedule_pops_earliest_eta_first() {
    let broker = MemoryTaskBroker::default();
    let now = Utc::now();
    let late = Task::new(propose(2), now - chrono::Duration::seconds(1), 3);
    let early = Task::new(propose(1), now - chrono::Duration::seconds(10), 3);
    broker.push(late.clone()).unwrap();
    broker.push(early.clone()).unwrap();

    assert_eq!(broker.next_eta(), Some(early.eta));
    assert_eq!(broker.pop_due(now).unwrap(), Some(early));
    assert_eq!(broker.pop_due(now).unwrap(), Some(late));
    assert_eq!(broker.pop_due(now).unwrap(), None);
}

#[tokio::test]
async fn success_acknowledges_the_task() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let metrics = metrics();
    let queue = TaskQueue::new(broker.clone(), conf(), &metrics);
    let handler = Arc::new(ScriptedHandler::new(vec![]));
    queue.register_task(TaskName::ProposeCheckpoint, handler.clone());

    queue.send_task(propose(1), Duration::ZERO, 3).unwrap();
    let task = broker.pop_due(Utc::now()).unwrap().unwrap();
    queue.process(task).await;

    assert_eq!(handler.calls(), 1);
    assert!(broker.is_empty());
    assert_eq!(
        metrics
            .tasks_processed_total()
            .with_label_values(&["propose_checkpoint", "success"])
            .get(),
        1
    );
}

#[tokio::test]
async fn retry_after_keeps_the_retry_budget() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let queue = TaskQueue::new(broker.clone(), conf(), &metrics());
    queue.register_task(
        TaskName::ProposeCheckpoint,
        Arc::new(ScriptedHandler::new(vec![retry_in_an_hour as fn() -> TaskOutcome])),
    );

    queue.send_task(propose(1), Duration::ZERO, 3).unwrap();
    let task = broker.pop_due(Utc::now()).unwrap().unwrap();
    queue.process(task.clone()).await;

    assert!(broker.pop_due(Utc::now()).unwrap().is_none());
    let rescheduled = broker.pop_due(far_future()).unwrap().unwrap();
    assert_eq!(rescheduled.id, task.id);
    assert_eq!(rescheduled.retry_count, 3);
    assert_eq!(rescheduled.attempts, 0);
    assert!(rescheduled.eta > Utc::now() + chrono::Duration::minutes(59));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failing_task_is_dropped_once_retries_run_out() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let metrics = metrics();
    let queue = TaskQueue::new(broker.clone(), conf(), &metrics);
    let handler = Arc::new(ScriptedHandler::new(vec![always_fail as fn() -> TaskOutcome; 10]));
    queue.register_task(TaskName::ProposeCheckpoint, handler.clone());

    queue.send_task(propose(1), Duration::ZERO, 2).unwrap();
    // retry_base is zero, so every retry is due immediately
    while let Some(task) = broker.pop_due(far_future()).unwrap() {
        queue.process(task).await;
    }

    assert_eq!(handler.calls(), 3);
    assert!(broker.is_empty());
    assert_eq!(
        metrics
            .tasks_processed_total()
            .with_label_values(&["propose_checkpoint", "dropped"])
            .get(),
        1
    );
    assert!(logs_contain("Task failed with no retries left, dropping"));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn panicking_handler_counts_as_a_failed_attempt() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let metrics = metrics();
    let queue = TaskQueue::new(broker.clone(), conf(), &metrics);
    let handler = Arc::new(ScriptedHandler::new(vec![panics as fn() -> TaskOutcome]));
    queue.register_task(TaskName::ProposeCheckpoint, handler.clone());

    let id = queue.send_task(propose(1), Duration::ZERO, 3).unwrap();
    let task = broker.pop_due(Utc::now()).unwrap().unwrap();
    queue.process(task).await;

    let rescheduled = broker.pop_due(far_future()).unwrap().unwrap();
    assert_eq!(rescheduled.id, id);
    assert_eq!(rescheduled.retry_count, 2);
    assert_eq!(rescheduled.attempts, 1);
    assert!(logs_contain("Task handler panicked: malformed payload"));
    assert_eq!(
        metrics
            .tasks_processed_total()
            .with_label_values(&["propose_checkpoint", "failed"])
            .get(),
        1
    );

    // the same queue keeps serving the task afterwards
    queue.process(rescheduled).await;
    assert_eq!(handler.calls(), 2);
    assert!(broker.is_empty());
}

#[test]
fn retry_backoff_doubles_and_is_capped() {
    let conf = TaskQueueConf {
        retry_base: 5,
        ..Default::default()
    };
    assert_eq!(conf.retry_backoff(1), Duration::from_secs(5));
    assert_eq!(conf.retry_backoff(2), Duration::from_secs(10));
    assert_eq!(conf.retry_backoff(3), Duration::from_secs(20));
    assert_eq!(conf.retry_backoff(30), MAX_RETRY_BACKOFF);
}

#[tokio::test]
async fn workers_drain_the_queue_and_stop_on_shutdown() {
    let broker = Arc::new(MemoryTaskBroker::default());
    let queue = Arc::new(TaskQueue::new(broker.clone(), conf(), &metrics()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(ScriptedHandler {
        done: Some(done_tx),
        ..ScriptedHandler::new(vec![])
    });
    queue.register_task(TaskName::ProposeCheckpoint, handler.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = queue.clone().run(shutdown_rx);

    let mut sent = vec![];
    for height in 0..5 {
        sent.push(queue.send_task(propose(height), Duration::ZERO, 3).unwrap());
    }
    let mut seen = vec![];
    while seen.len() < sent.len() {
        seen.push(done_rx.recv().await.unwrap());
    }
    seen.sort();
    sent.sort();
    assert_eq!(seen, sent);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), pool)
        .await
        .unwrap()
        .unwrap();
    assert!(broker.is_empty());
}

#[test]
fn unacknowledged_tasks_are_redelivered_after_reopen() {
    let (_dir, db) = temp_db();
    let task = Task::new(propose(7), Utc::now(), 3);
    {
        let broker = RocksTaskBroker::open(BridgeRocksDB::new(db.clone())).unwrap();
        broker.push(task.clone()).unwrap();
        // popped by a worker that never finished
        assert_eq!(broker.pop_due(Utc::now()).unwrap(), Some(task.clone()));
    }

    let broker = RocksTaskBroker::open(BridgeRocksDB::new(db.clone())).unwrap();
    assert_eq!(broker.len(), 1);
    assert_eq!(broker.pop_due(Utc::now()).unwrap(), Some(task.clone()));
    broker.ack(&task.id).unwrap();

    let broker = RocksTaskBroker::open(BridgeRocksDB::new(db)).unwrap();
    assert!(broker.is_empty());
}
