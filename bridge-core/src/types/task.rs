use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
    BlockHeader, EventId, Logged, NewHeaderBlockEvent, SignerChangeEvent, StakeUpdateEvent,
    StakedEvent, StateSyncedEvent, TopUpFeeEvent, UnstakeInitEvent, H160, H256,
};

/// Names handlers are registered under.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum TaskName {
    ValidatorJoin,
    StakeUpdate,
    SignerChange,
    UnstakeInit,
    StateSynced,
    TopUpFee,
    CheckpointAck,
    ProposeCheckpoint,
    SendCheckpointToRootChain,
}

/// A checkpoint finalized by the consensus chain, waiting to be submitted to
/// the root chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
#[allow(missing_docs)]
pub struct CheckpointEvent {
    /// Consensus chain transaction that carried the checkpoint
    pub tx_hash: H256,
    /// Consensus chain height the checkpoint event was emitted at
    pub height: u64,
    pub proposer: H160,
    pub start_block: u64,
    pub end_block: u64,
    pub root_hash: H256,
}

/// The typed arguments of a task. Serialized as `{"name": .., "args": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Relay a root chain `Staked` event
    ValidatorJoin(Logged<StakedEvent>),
    /// Relay a root chain `StakeUpdate` event
    StakeUpdate(Logged<StakeUpdateEvent>),
    /// Relay a root chain `SignerChange` event
    SignerChange(Logged<SignerChangeEvent>),
    /// Relay a root chain `UnstakeInit` event
    UnstakeInit(Logged<UnstakeInitEvent>),
    /// Relay a root chain `StateSynced` event
    StateSynced(Logged<StateSyncedEvent>),
    /// Relay a root chain `TopUpFee` event
    TopUpFee(Logged<TopUpFeeEvent>),
    /// Acknowledge a checkpoint accepted by the root chain
    CheckpointAck(Logged<NewHeaderBlockEvent>),
    /// Consider proposing a checkpoint up to this execution chain header
    ProposeCheckpoint(BlockHeader),
    /// Submit a finalized checkpoint to the root chain
    SendCheckpointToRootChain(CheckpointEvent),
}

impl TaskPayload {
    /// The handler name this payload is dispatched to
    pub fn name(&self) -> TaskName {
        match self {
            TaskPayload::ValidatorJoin(_) => TaskName::ValidatorJoin,
            TaskPayload::StakeUpdate(_) => TaskName::StakeUpdate,
            TaskPayload::SignerChange(_) => TaskName::SignerChange,
            TaskPayload::UnstakeInit(_) => TaskName::UnstakeInit,
            TaskPayload::StateSynced(_) => TaskName::StateSynced,
            TaskPayload::TopUpFee(_) => TaskName::TopUpFee,
            TaskPayload::CheckpointAck(_) => TaskName::CheckpointAck,
            TaskPayload::ProposeCheckpoint(_) => TaskName::ProposeCheckpoint,
            TaskPayload::SendCheckpointToRootChain(_) => TaskName::SendCheckpointToRootChain,
        }
    }

    /// The root chain log this task relays, if any
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            TaskPayload::ValidatorJoin(e) => Some(e.event_id()),
            TaskPayload::StakeUpdate(e) => Some(e.event_id()),
            TaskPayload::SignerChange(e) => Some(e.event_id()),
            TaskPayload::UnstakeInit(e) => Some(e.event_id()),
            TaskPayload::StateSynced(e) => Some(e.event_id()),
            TaskPayload::TopUpFee(e) => Some(e.event_id()),
            TaskPayload::CheckpointAck(e) => Some(e.event_id()),
            TaskPayload::ProposeCheckpoint(_) | TaskPayload::SendCheckpointToRootChain(_) => None,
        }
    }
}

/// A unit of durable work owned by the task queue until a handler
/// acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, used as the broker key
    pub id: Uuid,
    /// What to do
    pub payload: TaskPayload,
    /// Failed attempts still allowed
    pub retry_count: u32,
    /// Earliest time the task may run
    pub eta: DateTime<Utc>,
    /// Failed attempts so far, drives the retry backoff
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    /// Create a task with a fresh id
    pub fn new(payload: TaskPayload, eta: DateTime<Utc>, retry_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            retry_count,
            eta,
            attempts: 0,
        }
    }

    /// The handler name this task is dispatched to
    pub fn name(&self) -> TaskName {
        self.payload.name()
    }

    /// Whether the task may run at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eta <= now
    }
}

/// What a task handler decided.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Done; the task is acknowledged and removed
    Success,
    /// Not yet; re-run after the delay without consuming a retry
    RetryAfter(Duration),
    /// The attempt failed and consumes a retry
    Fail(eyre::Report),
}

impl TaskOutcome {
    /// Label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::RetryAfter(_) => "retry_later",
            TaskOutcome::Fail(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::LogMeta;

    use super::*;

    fn top_up() -> TaskPayload {
        TaskPayload::TopUpFee(Logged::new(
            TopUpFeeEvent {
                user: H160::from_low_u64_be(1),
                fee: crate::U256::from(10u64),
            },
            LogMeta::new(H160::zero(), 12, H256::from_low_u64_be(9), 4),
        ))
    }

    #[test]
    fn payload_is_tagged_with_its_task_name() {
        let value = serde_json::to_value(top_up()).unwrap();
        assert_eq!(value["name"], "top_up_fee");
        assert!(value["args"].is_object());

        let decoded: TaskPayload = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.name(), TaskName::TopUpFee);
        assert_eq!(
            decoded.event_id(),
            Some(EventId::new(H256::from_low_u64_be(9), 4))
        );
    }

    #[test]
    fn task_is_due_at_its_eta() {
        let now = Utc::now();
        let task = Task::new(top_up(), now, 3);
        assert!(task.is_due(now));
        assert!(!task.is_due(now - chrono::Duration::seconds(1)));
    }
}
