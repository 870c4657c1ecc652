//! Task handlers, one per event family.
//!
//! Every processor body is written as `eyre::Result<TaskOutcome>`: chain
//! errors propagate with `?` and are reported to the queue as a failed
//! attempt.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use bridge_base::queue::{TaskHandler, TaskQueue};
use bridge_core::{
    ChainResult, EventFamily, EventId, ExecutionChainClient, HeimdallClient, HeimdallMsg,
    RootChainClient, TaskName, TaskOutcome, H160,
};
use eyre::eyre;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{broadcaster::Broadcaster, settings::DelayConf};

pub use checkpoint::CheckpointProcessor;
pub use clerk::ClerkProcessor;
pub use fee::FeeProcessor;
pub use milestone::MilestoneProcessor;
pub use span::SpanProcessor;
pub use staking::StakingProcessor;

mod checkpoint;
mod clerk;
mod fee;
mod milestone;
mod span;
mod staking;

/// Largest multiple of the retry delay an out of order staking event waits
pub const MAX_NONCE_BACKOFF_FACTOR: u64 = 10;

/// A processor for one event family. Processors with work of their own
/// spawn it from [`Processor::spawn_loops`].
pub trait Processor: Send + Sync + Debug + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Spawn the processor's polling loops, if it has any
    fn spawn_loops(self: Arc<Self>, _shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![]
    }
}

/// A processor handling queued tasks
pub trait TaskProcessor: Processor + TaskHandler {
    /// Task names this processor handles
    fn task_names(&self) -> &'static [TaskName];
}

/// Register `processor` as the handler of each of its task names
pub fn register<P: TaskProcessor>(queue: &TaskQueue, processor: Arc<P>) {
    for name in processor.task_names() {
        queue.register_task(*name, processor.clone());
    }
}

/// Whether a staking event with `nonce` may be applied on top of
/// `confirmed`. `None` when it is the next one, otherwise the multiple of the
/// retry delay to wait for.
pub fn nonce_backoff_factor(confirmed: u64, nonce: u64) -> Option<u64> {
    if nonce == confirmed + 1 {
        return None;
    }
    if nonce <= confirmed {
        return Some(MAX_NONCE_BACKOFF_FACTOR);
    }
    Some((nonce - confirmed).min(MAX_NONCE_BACKOFF_FACTOR))
}

/// What every processor shares: chain access, the broadcaster and the
/// local validator's identity.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Signer address of the local validator
    pub validator_address: H160,
    /// Execution chain id as known by the consensus chain
    pub bor_chain_id: String,
    /// Consensus chain reads
    pub heimdall: Arc<dyn HeimdallClient>,
    /// Root chain reads
    pub root_chain: Arc<dyn RootChainClient>,
    /// Execution chain reads
    pub execution_chain: Arc<dyn ExecutionChainClient>,
    /// Submission to both destinations
    pub broadcaster: Arc<Broadcaster>,
    /// Retry delays
    pub delays: DelayConf,
}

impl ProcessorContext {
    /// Whether the consensus chain already applied the event. A hit is
    /// logged as an idempotent skip.
    pub async fn is_old_tx(
        &self,
        task: TaskName,
        event_id: EventId,
        family: EventFamily,
    ) -> ChainResult<bool> {
        let old = self
            .heimdall
            .is_old_tx(event_id.tx_hash, event_id.log_index, family)
            .await?;
        if old {
            info!(%task, %event_id, "Event already processed, skipping");
        }
        Ok(old)
    }

    /// Whether a message relaying the same event is waiting in the mempool
    pub async fn check_tx_against_mempool(&self, event_id: EventId) -> ChainResult<bool> {
        let pending = self.heimdall.unconfirmed_txs().await?;
        Ok(pending.iter().any(|msg| msg.event_id() == Some(event_id)))
    }

    /// `(true, 0)` when `nonce` directly follows the validator's confirmed
    /// nonce, otherwise `(false, factor)`. An unknown validator has confirmed
    /// nothing yet.
    pub async fn check_valid_nonce(&self, validator_id: u64, nonce: u64) -> ChainResult<(bool, u64)> {
        let confirmed = self
            .heimdall
            .validator(validator_id)
            .await?
            .map(|v| v.nonce)
            .unwrap_or(0);
        Ok(match nonce_backoff_factor(confirmed, nonce) {
            None => (true, 0),
            Some(factor) => {
                debug!(validator_id, confirmed, nonce, factor, "Nonce out of order");
                (false, factor)
            }
        })
    }

    /// Broadcast `msg` to the consensus chain. Only an OK response code is a
    /// success.
    pub async fn broadcast_to_heimdall(&self, msg: HeimdallMsg) -> eyre::Result<TaskOutcome> {
        let response = self.broadcaster.heimdall.broadcast(&msg).await?;
        if !response.is_ok() {
            return Err(eyre!(
                "{} rejected with code {}: {}",
                msg.kind(),
                response.code,
                response.raw_log
            ));
        }
        info!(msg = msg.kind(), tx_hash = ?response.tx_hash, "Broadcast to consensus chain");
        Ok(TaskOutcome::Success)
    }
}

/// Report the result of a processor body to the queue
pub(crate) fn into_outcome(task: TaskName, result: eyre::Result<TaskOutcome>) -> TaskOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(%task, ?err, "Task attempt failed");
            TaskOutcome::Fail(err)
        }
    }
}

/// `base` scaled by `factor`
pub(crate) fn scaled(base: Duration, factor: u64) -> Duration {
    base.saturating_mul(factor.min(u32::MAX as u64) as u32)
}

/// Spawn `tick` on every `interval` until `shutdown` fires, logging errors.
pub(crate) fn spawn_ticker<P, F, Fut>(
    processor: Arc<P>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    span: tracing::Span,
    tick: F,
) -> JoinHandle<()>
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = eyre::Result<()>> + Send,
{
    use tracing::Instrument;

    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = tick(processor.clone()).await {
                    warn!(?err, "Polling loop iteration failed");
                }
            }
        }
        .instrument(span),
    )
}
