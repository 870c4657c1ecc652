use async_trait::async_trait;
use bridge_base::queue::TaskHandler;
use bridge_core::{
    EventFamily, EventId, HeimdallMsg, Logged, Task, TaskName, TaskOutcome, TaskPayload, H160,
};
use derive_new::new;
use eyre::eyre;
use tracing::{info, instrument};

use super::{into_outcome, scaled, Processor, ProcessorContext, TaskProcessor};

const STAKING_TASKS: &[TaskName] = &[
    TaskName::ValidatorJoin,
    TaskName::StakeUpdate,
    TaskName::SignerChange,
    TaskName::UnstakeInit,
];

/// A staking event ready to relay
struct StakingMsg {
    event_id: EventId,
    validator_id: u64,
    nonce: u64,
    /// Account that must exist before a join can be relayed
    joining_signer: Option<H160>,
    msg: HeimdallMsg,
}

fn staking_msg(from: H160, payload: &TaskPayload) -> Option<StakingMsg> {
    Some(match payload {
        TaskPayload::ValidatorJoin(Logged { event, meta }) => StakingMsg {
            event_id: meta.event_id(),
            validator_id: event.validator_id,
            nonce: event.nonce,
            joining_signer: Some(event.signer),
            msg: HeimdallMsg::ValidatorJoin {
                from,
                validator_id: event.validator_id,
                activation_epoch: event.activation_epoch,
                amount: event.amount,
                signer_pub_key: event.signer_pub_key.clone(),
                tx_hash: meta.tx_hash,
                log_index: meta.log_index,
                block_number: meta.block_number,
                nonce: event.nonce,
            },
        },
        TaskPayload::StakeUpdate(Logged { event, meta }) => StakingMsg {
            event_id: meta.event_id(),
            validator_id: event.validator_id,
            nonce: event.nonce,
            joining_signer: None,
            msg: HeimdallMsg::StakeUpdate {
                from,
                validator_id: event.validator_id,
                new_amount: event.new_amount,
                tx_hash: meta.tx_hash,
                log_index: meta.log_index,
                block_number: meta.block_number,
                nonce: event.nonce,
            },
        },
        TaskPayload::SignerChange(Logged { event, meta }) => StakingMsg {
            event_id: meta.event_id(),
            validator_id: event.validator_id,
            nonce: event.nonce,
            joining_signer: None,
            msg: HeimdallMsg::SignerUpdate {
                from,
                validator_id: event.validator_id,
                new_signer_pub_key: event.signer_pub_key.clone(),
                tx_hash: meta.tx_hash,
                log_index: meta.log_index,
                block_number: meta.block_number,
                nonce: event.nonce,
            },
        },
        TaskPayload::UnstakeInit(Logged { event, meta }) => StakingMsg {
            event_id: meta.event_id(),
            validator_id: event.validator_id,
            nonce: event.nonce,
            joining_signer: None,
            msg: HeimdallMsg::ValidatorExit {
                from,
                validator_id: event.validator_id,
                deactivation_epoch: event.deactivation_epoch,
                tx_hash: meta.tx_hash,
                log_index: meta.log_index,
                block_number: meta.block_number,
                nonce: event.nonce,
            },
        },
        _ => return None,
    })
}

/// Relays validator joins, stake updates, signer changes and unbondings in
/// strict per-validator nonce order.
#[derive(Debug, new)]
pub struct StakingProcessor {
    ctx: ProcessorContext,
}

impl StakingProcessor {
    async fn process(&self, task: &Task) -> eyre::Result<TaskOutcome> {
        let name = task.name();
        let staking = staking_msg(self.ctx.validator_address, &task.payload)
            .ok_or_else(|| eyre!("Task {name} is not a staking event"))?;

        if self
            .ctx
            .is_old_tx(name, staking.event_id, EventFamily::Staking)
            .await?
        {
            return Ok(TaskOutcome::Success);
        }

        let (valid, factor) = self
            .ctx
            .check_valid_nonce(staking.validator_id, staking.nonce)
            .await?;
        if !valid {
            let delay = scaled(self.ctx.delays.retry_task_delay(), factor);
            info!(
                validator_id = staking.validator_id,
                nonce = staking.nonce,
                factor,
                ?delay,
                "Staking event out of order, retrying later"
            );
            return Ok(TaskOutcome::RetryAfter(delay));
        }

        if let Some(signer) = staking.joining_signer {
            if self.ctx.heimdall.account(signer).await?.is_none() {
                let delay = self.ctx.delays.validator_join_retry_delay();
                info!(?signer, ?delay, "Joining validator has no account yet, retrying later");
                return Ok(TaskOutcome::RetryAfter(delay));
            }
        }

        self.ctx.broadcast_to_heimdall(staking.msg).await
    }
}

#[async_trait]
impl TaskHandler for StakingProcessor {
    #[instrument(skip_all, fields(processor = "staking"))]
    async fn handle(&self, task: &Task) -> TaskOutcome {
        into_outcome(task.name(), self.process(task).await)
    }
}

impl Processor for StakingProcessor {
    fn name(&self) -> &'static str {
        "staking"
    }
}

impl TaskProcessor for StakingProcessor {
    fn task_names(&self) -> &'static [TaskName] {
        STAKING_TASKS
    }
}
