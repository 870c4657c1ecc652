use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_base::{db::CursorStore, queue::TaskQueue, CoreMetrics};
use bridge_core::{
    BlockHeader, BlockRequest, ChainKind, ChainResult, HeimdallClient, Logged, RawLog,
    RootChainClient, RootChainEvent, TaskPayload, H160, ROOT_CHAIN_CURSOR_KEY,
};
use eyre::Context;
use prometheus::IntGauge;
use tracing::{debug, info, instrument, warn};

use crate::settings::{DelayConf, ListenerConf};

use super::{block_range, calculate_task_delay, ListenerStrategy};

/// Scans the bridge contracts on the root chain and enqueues one task per
/// relayed event.
#[derive(Debug)]
pub struct RootChainListener {
    root_chain: Arc<dyn RootChainClient>,
    heimdall: Arc<dyn HeimdallClient>,
    queue: Arc<TaskQueue>,
    cursors: Arc<dyn CursorStore>,
    validator_address: H160,
    conf: ListenerConf,
    delays: DelayConf,
    last_block: IntGauge,
}

impl RootChainListener {
    /// Create the root chain strategy
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root_chain: Arc<dyn RootChainClient>,
        heimdall: Arc<dyn HeimdallClient>,
        queue: Arc<TaskQueue>,
        cursors: Arc<dyn CursorStore>,
        validator_address: H160,
        conf: ListenerConf,
        delays: DelayConf,
        metrics: &CoreMetrics,
    ) -> Self {
        let last_block = metrics
            .listener_last_block()
            .with_label_values(&[ChainKind::RootChain.as_ref()]);
        Self {
            root_chain,
            heimdall,
            queue,
            cursors,
            validator_address,
            conf,
            delays,
            last_block,
        }
    }

    /// Decode `log` and enqueue the task it calls for, if any.
    ///
    /// Logs the bridge does not relay, and logs that cannot be decoded, are
    /// skipped. An error means the task could not be enqueued.
    #[instrument(skip_all, fields(tx_hash = ?log.meta.tx_hash, log_index = log.meta.log_index))]
    pub async fn handle_log(&self, log: &RawLog) -> eyre::Result<()> {
        let event = match self.root_chain.decode_event(log) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(topic = ?log.topic0(), "Log is not a relayed event, skipping");
                return Ok(());
            }
            Err(err) => {
                warn!(?err, "Failed to decode log, skipping");
                return Ok(());
            }
        };
        let name = event.name().to_owned();
        let meta = log.meta;

        let (payload, is_own) = match event {
            RootChainEvent::Staked(event) => {
                let is_own = event.signer == self.validator_address;
                (TaskPayload::ValidatorJoin(Logged::new(event, meta)), is_own)
            }
            RootChainEvent::StakeUpdate(event) => {
                let is_own = self.is_local_validator(event.validator_id).await?;
                (TaskPayload::StakeUpdate(Logged::new(event, meta)), is_own)
            }
            RootChainEvent::UnstakeInit(event) => {
                let is_own = self.is_local_validator(event.validator_id).await?;
                (TaskPayload::UnstakeInit(Logged::new(event, meta)), is_own)
            }
            RootChainEvent::SignerChange(event) => {
                let is_own = event.new_signer == self.validator_address;
                (TaskPayload::SignerChange(Logged::new(event, meta)), is_own)
            }
            RootChainEvent::TopUpFee(event) => {
                let is_own = event.user == self.validator_address;
                (TaskPayload::TopUpFee(Logged::new(event, meta)), is_own)
            }
            RootChainEvent::StateSynced(event) => {
                (TaskPayload::StateSynced(Logged::new(event, meta)), false)
            }
            RootChainEvent::NewHeaderBlock(event) => {
                (TaskPayload::CheckpointAck(Logged::new(event, meta)), false)
            }
        };

        let delay = if is_own {
            Duration::ZERO
        } else {
            match self.backstop_delay().await? {
                Some(delay) => delay,
                None => {
                    debug!(event = %name, "Not in the validator set, leaving event to others");
                    return Ok(());
                }
            }
        };

        let id = self
            .queue
            .send_task(payload, delay, self.queue.default_retry_count())
            .with_context(|| format!("Enqueueing {name}"))?;
        info!(event = %name, task = %id, ?delay, "Enqueued root chain event");
        Ok(())
    }

    async fn is_local_validator(&self, validator_id: u64) -> ChainResult<bool> {
        Ok(self
            .heimdall
            .validator(validator_id)
            .await?
            .is_some_and(|v| v.signer == self.validator_address))
    }

    /// Delay of a submission this validator makes on behalf of others, `None`
    /// when it is not in the validator set.
    async fn backstop_delay(&self) -> ChainResult<Option<Duration>> {
        let set = self.heimdall.validator_set().await?;
        let Some(position) = set.position_of(&self.validator_address) else {
            return Ok(None);
        };
        let mempool = self.heimdall.unconfirmed_tx_count().await?;
        Ok(Some(calculate_task_delay(
            position,
            self.delays.task_delay_between_each_val(),
            mempool,
        )))
    }
}

#[async_trait]
impl ListenerStrategy for RootChainListener {
    fn chain(&self) -> ChainKind {
        ChainKind::RootChain
    }

    fn header_request(&self) -> BlockRequest {
        BlockRequest::Finalized
    }

    async fn fetch_header(&self, request: BlockRequest) -> ChainResult<BlockHeader> {
        self.root_chain.header_by_number(request).await
    }

    #[instrument(skip_all, fields(number = header.number, finalized = header.is_finalized))]
    async fn process_header(&self, header: BlockHeader) -> eyre::Result<()> {
        let cursor = self.cursors.retrieve_cursor(ROOT_CHAIN_CURSOR_KEY)?;
        let Some((from, to)) = block_range(&header, self.conf.required_confirmations, cursor)
        else {
            debug!(?cursor, "Nothing new to scan");
            return Ok(());
        };

        let addresses = self
            .heimdall
            .chain_manager_params()
            .await?
            .contract_addresses();
        let logs = self
            .root_chain
            .filter_logs(from, to, &addresses)
            .await
            .with_context(|| format!("Fetching logs in [{from}, {to}]"))?;
        debug!(from, to, logs = logs.len(), "Scanning root chain range");

        for log in &logs {
            self.handle_log(log)
                .await
                .with_context(|| format!("Dispatching log at block {}", log.meta.block_number))?;
        }

        self.cursors.store_cursor(ROOT_CHAIN_CURSOR_KEY, to)?;
        self.last_block.set(to as i64);
        Ok(())
    }
}
