use std::sync::Arc;

use bridge_core::{BlockRequest, HeimdallMsg, Span};
use derive_new::new;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, info_span, instrument};

use crate::settings::SpanConf;

use super::{spawn_ticker, Processor, ProcessorContext};

/// Block range of the span following `span`
pub fn next_span_range(span: &Span, duration: u64) -> (u64, u64) {
    (span.end_block + 1, span.end_block + duration.max(1))
}

/// Keeps the consensus chain's spans ahead of the execution chain: backfills
/// spans the execution chain already uses and proposes the next one while
/// the current span is running.
#[derive(Debug, new)]
pub struct SpanProcessor {
    ctx: ProcessorContext,
    conf: SpanConf,
}

impl SpanProcessor {
    /// One evaluation of the span loop
    #[instrument(skip_all)]
    pub async fn check_span(&self) -> eyre::Result<()> {
        let proposer = self.ctx.heimdall.current_proposer().await?;
        if proposer.signer != self.ctx.validator_address {
            return Ok(());
        }

        let latest_span = self.ctx.heimdall.latest_span().await?;
        let bor_span_id = self.ctx.execution_chain.current_span_id().await?;
        if bor_span_id > latest_span.id {
            info!(
                latest_span_id = latest_span.id,
                bor_span_id, "Execution chain is ahead of the consensus chain spans, backfilling"
            );
            self.ctx
                .broadcast_to_heimdall(HeimdallMsg::BackfillSpans {
                    from: self.ctx.validator_address,
                    bor_chain_id: self.ctx.bor_chain_id.clone(),
                    latest_span_id: latest_span.id,
                    latest_bor_span_id: bor_span_id,
                })
                .await?;
            return Ok(());
        }

        let latest = self
            .ctx
            .execution_chain
            .header_by_number(BlockRequest::Latest)
            .await?;
        if !(latest_span.start_block..=latest_span.end_block).contains(&latest.number) {
            debug!(
                span_id = latest_span.id,
                latest = latest.number,
                "Latest block outside the latest span"
            );
            return Ok(());
        }

        let span_id = latest_span.id + 1;
        let seed = self.ctx.heimdall.next_span_seed(span_id).await?;
        let (start_block, end_block) = next_span_range(&latest_span, self.conf.duration);
        info!(span_id, start_block, end_block, "Proposing span");
        self.ctx
            .broadcast_to_heimdall(HeimdallMsg::ProposeSpan {
                span_id,
                proposer: self.ctx.validator_address,
                start_block,
                end_block,
                bor_chain_id: self.ctx.bor_chain_id.clone(),
                seed,
            })
            .await?;
        Ok(())
    }
}

impl Processor for SpanProcessor {
    fn name(&self) -> &'static str {
        "span"
    }

    fn spawn_loops(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let interval = self.conf.poll_interval();
        vec![spawn_ticker(
            self,
            interval,
            shutdown,
            info_span!("SpanProposal"),
            |this| async move { this.check_span().await },
        )]
    }
}

#[cfg(test)]
mod tests {
    use bridge_core::{BlockHeader, H160, H256};

    use crate::test_utils::{
        broadcaster, context_with, local_validator, ok_response, validator, MockExecutionChain,
        MockHeimdall, MockHeimdallSubmitter, MockRootChain, MockRootChainSubmitter,
    };

    use super::*;

    fn span(id: u64, start_block: u64, end_block: u64) -> Span {
        Span::new(id, start_block, end_block, "137".to_owned())
    }

    fn heimdall(latest: Span) -> MockHeimdall {
        let mut heimdall = MockHeimdall::new();
        heimdall
            .expect_current_proposer()
            .returning(|| Ok(validator(1, local_validator(), 0)));
        heimdall
            .expect_latest_span()
            .returning(move || Ok(latest.clone()));
        heimdall
            .expect_next_span_seed()
            .returning(|id| Ok(H256::from_low_u64_be(id)));
        heimdall
    }

    fn execution_chain(span_id: u64, latest: u64) -> MockExecutionChain {
        let mut execution_chain = MockExecutionChain::new();
        execution_chain
            .expect_current_span_id()
            .returning(move || Ok(span_id));
        execution_chain
            .expect_header_by_number()
            .returning(move |_| Ok(BlockHeader::at_height(latest, false)));
        execution_chain
    }

    fn processor(
        heimdall: MockHeimdall,
        execution_chain: MockExecutionChain,
        submitter: MockHeimdallSubmitter,
    ) -> SpanProcessor {
        SpanProcessor::new(
            context_with(
                heimdall,
                MockRootChain::new(),
                execution_chain,
                broadcaster(submitter, MockRootChainSubmitter::new()),
            ),
            SpanConf::default(),
        )
    }

    #[test]
    fn next_span_follows_the_latest() {
        assert_eq!(next_span_range(&span(4, 256, 6655), 6400), (6656, 13055));
    }

    #[tokio::test]
    async fn next_span_is_proposed_while_the_latest_runs() {
        let mut submitter = MockHeimdallSubmitter::new();
        submitter
            .expect_sign_and_broadcast()
            .withf(|msg, _, _| {
                matches!(msg, HeimdallMsg::ProposeSpan { span_id: 5, start_block: 6656, end_block: 13055, seed, .. }
                    if *seed == H256::from_low_u64_be(5))
            })
            .times(1)
            .returning(|_, _, _| Ok(ok_response()));

        processor(heimdall(span(4, 256, 6655)), execution_chain(4, 3000), submitter)
            .check_span()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lagging_spans_are_backfilled() {
        let mut submitter = MockHeimdallSubmitter::new();
        submitter
            .expect_sign_and_broadcast()
            .withf(|msg, _, _| {
                matches!(
                    msg,
                    HeimdallMsg::BackfillSpans { latest_span_id: 4, latest_bor_span_id: 7, .. }
                )
            })
            .times(1)
            .returning(|_, _, _| Ok(ok_response()));

        processor(heimdall(span(4, 256, 6655)), execution_chain(7, 30_000), submitter)
            .check_span()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn already_proposed_span_is_left_alone() {
        // the latest span starts after the tip, so it was proposed already
        processor(
            heimdall(span(5, 6656, 13055)),
            execution_chain(4, 6000),
            MockHeimdallSubmitter::new(),
        )
        .check_span()
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn non_proposer_stays_quiet() {
        let mut heimdall = MockHeimdall::new();
        heimdall
            .expect_current_proposer()
            .returning(|| Ok(validator(1, H160::from_low_u64_be(0xdead), 0)));
        processor(heimdall, MockExecutionChain::new(), MockHeimdallSubmitter::new())
            .check_span()
            .await
            .unwrap();
    }
}
