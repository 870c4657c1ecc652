//! Reconciliation of the root chain listener against the subgraph.
//!
//! The subgraph indexes the same root chain events the listener scans. When
//! the consensus chain lags behind what the subgraph reports, the missing
//! logs are fetched from their transaction receipts and replayed through
//! [`RootChainListener::handle_log`].

use std::sync::Arc;
use std::time::Duration;

use bridge_base::CoreMetrics;
use bridge_core::{
    rpc_clients::call_and_retry, BlockRequest, HeimdallClient, IndexedLog, RawLog,
    RootChainClient, SubgraphClient, Validator,
};
use chrono::Utc;
use eyre::{eyre, Context};
use futures::future::{BoxFuture, FutureExt};
use prometheus::IntCounterVec;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::settings::SelfHealingConf;

use super::RootChainListener;

const STATE_SYNC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Replays root chain events the consensus chain never received.
#[derive(Debug)]
pub struct SelfHealing {
    root_listener: Arc<RootChainListener>,
    heimdall: Arc<dyn HeimdallClient>,
    root_chain: Arc<dyn RootChainClient>,
    subgraph: Arc<dyn SubgraphClient>,
    conf: SelfHealingConf,
    missing: IntCounterVec,
}

impl SelfHealing {
    /// Create a reconciler replaying through `root_listener`
    pub fn new(
        root_listener: Arc<RootChainListener>,
        heimdall: Arc<dyn HeimdallClient>,
        root_chain: Arc<dyn RootChainClient>,
        subgraph: Arc<dyn SubgraphClient>,
        conf: SelfHealingConf,
        metrics: &CoreMetrics,
    ) -> Self {
        Self {
            root_listener,
            heimdall,
            root_chain,
            subgraph,
            conf,
            missing: metrics.self_healing_missing_total(),
        }
    }

    /// Spawn the stake and state sync tickers.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            stake_interval = ?self.conf.stake_interval(),
            state_sync_interval = ?self.conf.state_sync_interval(),
            "Starting self-healing"
        );
        let stakes = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    this.run_ticker(this.conf.stake_interval(), shutdown, |this| {
                        async move { this.reconcile_stakes().await }.boxed()
                    })
                    .await
                }
                .instrument(info_span!("SelfHealingStakes")),
            )
        };
        let state_syncs = tokio::spawn(
            async move {
                self.run_ticker(self.conf.state_sync_interval(), shutdown, |this| {
                    async move { this.reconcile_state_syncs().await }.boxed()
                })
                .await
            }
            .instrument(info_span!("SelfHealingStateSyncs")),
        );
        vec![stakes, state_syncs]
    }

    async fn run_ticker<F>(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        reconcile: F,
    ) where
        F: Fn(Arc<Self>) -> BoxFuture<'static, eyre::Result<()>>,
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = reconcile(self.clone()).await {
                warn!(?err, "Reconciliation failed");
            }
        }
    }

    /// Replay state syncs the consensus chain is missing, oldest first. Stops
    /// at the first id that cannot be confirmed, so it is the first one tried
    /// on the next tick.
    pub async fn reconcile_state_syncs(&self) -> eyre::Result<()> {
        let last_applied = self.heimdall.last_event_record_id().await?;
        let subgraph = self.subgraph.clone();
        let latest = call_and_retry(|| {
            let subgraph = subgraph.clone();
            Box::pin(async move { subgraph.latest_state_synced_id().await })
        })
        .await
        .context("Fetching the latest state sync id")?;
        let Some(latest) = latest else {
            return Ok(());
        };
        if latest <= last_applied {
            debug!(last_applied, "State syncs are up to date");
            return Ok(());
        }

        for id in (last_applied + 1)..=latest {
            if self.heimdall.event_record_exists(id).await? {
                continue;
            }
            let subgraph = self.subgraph.clone();
            let entry = call_and_retry(|| {
                let subgraph = subgraph.clone();
                Box::pin(async move { subgraph.state_synced_by_id(id).await })
            })
            .await?
            .ok_or_else(|| eyre!("State sync {id} is not indexed"))?;

            let Some(log) = self.find_log(&entry.log).await? else {
                warn!(id, tx_hash = ?entry.log.tx_hash, "State sync log not found in its receipt");
                break;
            };
            if !self.is_old_enough(entry.log.block_number).await? {
                debug!(id, "State sync is recent, leaving it to the listener");
                break;
            }

            self.missing.with_label_values(&["state_sync"]).inc();
            info!(id, tx_hash = ?entry.log.tx_hash, "Replaying missing state sync");
            self.root_listener.handle_log(&log).await?;

            if !self.wait_for_event_record(id).await? {
                warn!(id, "Replayed state sync not applied yet, retrying next tick");
                break;
            }
        }
        Ok(())
    }

    async fn wait_for_event_record(&self, id: u64) -> eyre::Result<bool> {
        for _ in 0..self.conf.state_sync_poll_attempts {
            sleep(STATE_SYNC_POLL_INTERVAL).await;
            if self.heimdall.event_record_exists(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Replay the next stake update of every validator whose root chain
    /// nonce is ahead of the consensus chain's.
    pub async fn reconcile_stakes(&self) -> eyre::Result<()> {
        let set = self.heimdall.validator_set().await?;
        for validator in &set.validators {
            if let Err(err) = self.reconcile_validator(validator).await {
                warn!(validator_id = validator.id, ?err, "Failed to reconcile validator");
            }
        }
        Ok(())
    }

    async fn reconcile_validator(&self, validator: &Validator) -> eyre::Result<()> {
        let validator_id = validator.id;
        let subgraph = self.subgraph.clone();
        let latest = call_and_retry(|| {
            let subgraph = subgraph.clone();
            Box::pin(async move { subgraph.latest_stake_update(validator_id).await })
        })
        .await?;
        let Some(latest) = latest else {
            return Ok(());
        };
        if latest.nonce <= validator.nonce {
            return Ok(());
        }

        let nonce = validator.nonce + 1;
        let subgraph = self.subgraph.clone();
        let entry = call_and_retry(|| {
            let subgraph = subgraph.clone();
            Box::pin(async move { subgraph.stake_update_by_nonce(validator_id, nonce).await })
        })
        .await?
        .ok_or_else(|| eyre!("Stake update {nonce} is not indexed"))?;

        let Some(log) = self.find_log(&entry.log).await? else {
            warn!(validator_id, nonce, "Stake update log not found in its receipt");
            return Ok(());
        };
        if !self.is_old_enough(entry.log.block_number).await? {
            return Ok(());
        }

        self.missing.with_label_values(&["stake"]).inc();
        info!(
            validator_id,
            nonce,
            root_chain_nonce = latest.nonce,
            "Replaying missing stake update"
        );
        self.root_listener.handle_log(&log).await
    }

    async fn find_log(&self, indexed: &IndexedLog) -> eyre::Result<Option<RawLog>> {
        let logs = self.root_chain.transaction_logs(indexed.tx_hash).await?;
        Ok(logs
            .into_iter()
            .find(|log| log.meta.log_index == indexed.log_index))
    }

    async fn is_old_enough(&self, block_number: u64) -> eyre::Result<bool> {
        let header = self
            .root_chain
            .header_by_number(BlockRequest::Number(block_number))
            .await?;
        let age = Utc::now().timestamp().saturating_sub(header.timestamp as i64);
        Ok(age >= self.conf.max_depth_duration as i64)
    }
}
