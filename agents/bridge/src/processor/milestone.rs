use std::sync::Arc;

use bridge_core::{BlockRequest, HeimdallMsg};
use chrono::Utc;
use derive_new::new;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, info_span, instrument};
use uuid::Uuid;

use crate::settings::MilestoneConf;

use super::{spawn_ticker, Processor, ProcessorContext};

/// The next milestone `[start, end]` of `length` blocks after `last_end`,
/// once its end is buried under `confirmations` blocks below `latest`.
pub fn next_milestone_range(
    last_end: Option<u64>,
    latest: u64,
    length: u64,
    confirmations: u64,
) -> Option<(u64, u64)> {
    let start = last_end.map_or(0, |end| end + 1);
    let end = start + length.max(1) - 1;
    (end <= latest.checked_sub(confirmations)?).then_some((start, end))
}

/// Proposes milestones and milestone timeouts. Both run as polling loops;
/// nothing is enqueued for this processor.
#[derive(Debug, new)]
pub struct MilestoneProcessor {
    ctx: ProcessorContext,
    conf: MilestoneConf,
}

impl MilestoneProcessor {
    async fn is_current_proposer(&self) -> eyre::Result<bool> {
        let proposer = self.ctx.heimdall.current_proposer().await?;
        Ok(proposer.signer == self.ctx.validator_address)
    }

    /// Propose the milestone following the latest one, if this validator is
    /// the proposer and enough blocks are confirmed.
    #[instrument(skip_all)]
    pub async fn propose_milestone(&self) -> eyre::Result<()> {
        if !self.is_current_proposer().await? {
            return Ok(());
        }

        let last_end = self
            .ctx
            .heimdall
            .latest_milestone()
            .await?
            .map(|m| m.end_block);
        let latest = self
            .ctx
            .execution_chain
            .header_by_number(BlockRequest::Latest)
            .await?;
        let Some((start_block, end_block)) = next_milestone_range(
            last_end,
            latest.number,
            self.conf.length,
            self.conf.confirmations,
        ) else {
            debug!(?last_end, latest = latest.number, "Milestone not confirmed deep enough yet");
            return Ok(());
        };

        let end_header = self
            .ctx
            .execution_chain
            .header_by_number(BlockRequest::Number(end_block))
            .await?;
        let milestone_id = format!("{}-{:#x}", Uuid::new_v4(), self.ctx.validator_address);

        // another milestone may have landed while the end header was fetched
        let current_end = self
            .ctx
            .heimdall
            .latest_milestone()
            .await?
            .map(|m| m.end_block);
        if current_end != last_end {
            info!(?last_end, ?current_end, "Latest milestone moved, dropping proposal");
            return Ok(());
        }

        info!(start_block, end_block, %milestone_id, "Proposing milestone");
        self.ctx
            .broadcast_to_heimdall(HeimdallMsg::Milestone {
                proposer: self.ctx.validator_address,
                start_block,
                end_block,
                hash: end_header.hash,
                bor_chain_id: self.ctx.bor_chain_id.clone(),
                milestone_id,
            })
            .await?;
        Ok(())
    }

    /// Propose a milestone timeout once the execution chain ran too far past
    /// the last milestone.
    #[instrument(skip_all)]
    pub async fn propose_milestone_timeout(&self) -> eyre::Result<()> {
        let Some(last) = self.ctx.heimdall.latest_milestone().await? else {
            return Ok(());
        };
        let latest = self
            .ctx
            .execution_chain
            .header_by_number(BlockRequest::Latest)
            .await?;
        if latest.number <= last.end_block + self.conf.timeout_blocks {
            return Ok(());
        }

        if let Some(last_timeout) = self.ctx.heimdall.last_milestone_timeout().await? {
            let since = Utc::now().timestamp().saturating_sub(last_timeout as i64);
            if since < self.conf.timeout_buffer_time as i64 {
                debug!(since, "Last milestone timeout too recent");
                return Ok(());
            }
        }

        let proposers = self
            .ctx
            .heimdall
            .next_proposers(self.conf.proposer_lookahead)
            .await?;
        if !proposers
            .iter()
            .any(|p| p.signer == self.ctx.validator_address)
        {
            return Ok(());
        }

        info!(
            last_end = last.end_block,
            latest = latest.number,
            "Execution chain drifted past the last milestone, proposing timeout"
        );
        self.ctx
            .broadcast_to_heimdall(HeimdallMsg::MilestoneTimeout {
                from: self.ctx.validator_address,
            })
            .await?;
        Ok(())
    }
}

impl Processor for MilestoneProcessor {
    fn name(&self) -> &'static str {
        "milestone"
    }

    fn spawn_loops(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let proposal_interval = self.conf.poll_interval();
        let timeout_interval = self.conf.timeout_poll_interval();
        vec![
            spawn_ticker(
                self.clone(),
                proposal_interval,
                shutdown.clone(),
                info_span!("MilestoneProposal"),
                |this| async move { this.propose_milestone().await },
            ),
            spawn_ticker(
                self,
                timeout_interval,
                shutdown,
                info_span!("MilestoneTimeout"),
                |this| async move { this.propose_milestone_timeout().await },
            ),
        ]
    }
}
