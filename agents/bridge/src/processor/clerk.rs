use async_trait::async_trait;
use bridge_base::queue::TaskHandler;
use bridge_core::{EventFamily, HeimdallMsg, Logged, Task, TaskName, TaskOutcome, TaskPayload};
use derive_new::new;
use eyre::eyre;
use tracing::{info, instrument, warn};

use super::{into_outcome, Processor, ProcessorContext, TaskProcessor};

/// Relays root chain state syncs as event records.
#[derive(Debug, new)]
pub struct ClerkProcessor {
    ctx: ProcessorContext,
    max_state_sync_size: usize,
}

impl ClerkProcessor {
    async fn process(&self, task: &Task) -> eyre::Result<TaskOutcome> {
        let TaskPayload::StateSynced(Logged { event, meta }) = &task.payload else {
            return Err(eyre!("Task {} is not a state sync", task.name()));
        };
        let event_id = meta.event_id();

        if self
            .ctx
            .is_old_tx(task.name(), event_id, EventFamily::Clerk)
            .await?
        {
            return Ok(TaskOutcome::Success);
        }
        if self.ctx.check_tx_against_mempool(event_id).await? {
            let delay = self.ctx.delays.retry_state_sync_task_delay();
            info!(id = event.id, %event_id, ?delay, "State sync already in the mempool, retrying later");
            return Ok(TaskOutcome::RetryAfter(delay));
        }

        let data = if event.data.len() > self.max_state_sync_size {
            warn!(
                id = event.id,
                size = event.data.len(),
                max = self.max_state_sync_size,
                "State sync data too large, relaying it empty"
            );
            vec![]
        } else {
            event.data.clone()
        };

        let msg = HeimdallMsg::EventRecord {
            from: self.ctx.validator_address,
            tx_hash: meta.tx_hash,
            log_index: meta.log_index,
            block_number: meta.block_number,
            contract_address: event.contract_address,
            data,
            id: event.id,
            chain_id: self.ctx.bor_chain_id.clone(),
        };
        self.ctx.broadcast_to_heimdall(msg).await
    }
}

#[async_trait]
impl TaskHandler for ClerkProcessor {
    #[instrument(skip_all, fields(processor = "clerk"))]
    async fn handle(&self, task: &Task) -> TaskOutcome {
        into_outcome(task.name(), self.process(task).await)
    }
}

impl Processor for ClerkProcessor {
    fn name(&self) -> &'static str {
        "clerk"
    }
}

impl TaskProcessor for ClerkProcessor {
    fn task_names(&self) -> &'static [TaskName] {
        &[TaskName::StateSynced]
    }
}
