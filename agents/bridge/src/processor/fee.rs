use async_trait::async_trait;
use bridge_base::queue::TaskHandler;
use bridge_core::{EventFamily, HeimdallMsg, Logged, Task, TaskName, TaskOutcome, TaskPayload};
use derive_new::new;
use eyre::eyre;
use tracing::instrument;

use super::{into_outcome, Processor, ProcessorContext, TaskProcessor};

/// Relays fee top-ups. Top-ups commute, so only the idempotency check
/// applies.
#[derive(Debug, new)]
pub struct FeeProcessor {
    ctx: ProcessorContext,
}

impl FeeProcessor {
    async fn process(&self, task: &Task) -> eyre::Result<TaskOutcome> {
        let TaskPayload::TopUpFee(Logged { event, meta }) = &task.payload else {
            return Err(eyre!("Task {} is not a fee top-up", task.name()));
        };
        if self
            .ctx
            .is_old_tx(task.name(), meta.event_id(), EventFamily::TopUp)
            .await?
        {
            return Ok(TaskOutcome::Success);
        }

        let msg = HeimdallMsg::TopupFee {
            from: self.ctx.validator_address,
            user: event.user,
            fee: event.fee,
            tx_hash: meta.tx_hash,
            log_index: meta.log_index,
            block_number: meta.block_number,
        };
        self.ctx.broadcast_to_heimdall(msg).await
    }
}

#[async_trait]
impl TaskHandler for FeeProcessor {
    #[instrument(skip_all, fields(processor = "fee"))]
    async fn handle(&self, task: &Task) -> TaskOutcome {
        into_outcome(task.name(), self.process(task).await)
    }
}

impl Processor for FeeProcessor {
    fn name(&self) -> &'static str {
        "fee"
    }
}

impl TaskProcessor for FeeProcessor {
    fn task_names(&self) -> &'static [TaskName] {
        &[TaskName::TopUpFee]
    }
}
