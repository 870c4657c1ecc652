use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_base::queue::TaskQueue;
use bridge_core::{
    BlockHeader, BlockRequest, ChainKind, ChainResult, ExecutionChainClient, TaskPayload,
};
use derive_new::new;
use tracing::debug;

use super::ListenerStrategy;

/// Turns every execution chain header into a checkpoint proposal check.
/// Whether this validator is the one to propose is decided when the task
/// runs.
#[derive(Debug, new)]
pub struct ExecutionChainListener {
    execution_chain: Arc<dyn ExecutionChainClient>,
    queue: Arc<TaskQueue>,
    retry_count: u32,
}

#[async_trait]
impl ListenerStrategy for ExecutionChainListener {
    fn chain(&self) -> ChainKind {
        ChainKind::ExecutionChain
    }

    async fn fetch_header(&self, request: BlockRequest) -> ChainResult<BlockHeader> {
        self.execution_chain.header_by_number(request).await
    }

    async fn process_header(&self, header: BlockHeader) -> eyre::Result<()> {
        let id = self.queue.send_task(
            TaskPayload::ProposeCheckpoint(header),
            Duration::ZERO,
            self.retry_count,
        )?;
        debug!(number = header.number, task = %id, "Enqueued checkpoint proposal");
        Ok(())
    }
}
