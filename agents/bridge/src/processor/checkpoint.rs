//! Checkpoints: proposing them on the consensus chain, carrying finalized ones
//! to the root chain, acknowledging the ones the root chain accepted, and
//! proposing a no-ack when an acknowledgement is overdue.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_base::queue::TaskHandler;
use bridge_core::{
    BlockHeader, CheckpointEvent, EventFamily, HeimdallMsg, Logged, NewHeaderBlockEvent,
    RootChainCall, Task, TaskName, TaskOutcome, TaskPayload,
};
use chrono::Utc;
use derive_new::new;
use eyre::{eyre, Context};
use itertools::Itertools;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, info_span, instrument};

use crate::settings::CheckpointConf;

use super::{into_outcome, spawn_ticker, Processor, ProcessorContext, TaskProcessor};

const CHECKPOINT_TASKS: &[TaskName] = &[
    TaskName::ProposeCheckpoint,
    TaskName::SendCheckpointToRootChain,
    TaskName::CheckpointAck,
];

/// The next checkpoint range `[start, end]` given the end of the last
/// checkpoint on the root chain and the latest execution chain block. The
/// range covers a multiple of `min_length` blocks, at most `max_length`.
pub fn next_checkpoint_range(
    last_end: Option<u64>,
    latest: u64,
    min_length: u64,
    max_length: u64,
) -> Option<(u64, u64)> {
    let min_length = min_length.max(1);
    let start = last_end.map_or(0, |end| end + 1);
    if latest < start {
        return None;
    }
    let diff = latest - start + 1;
    if diff < min_length {
        return None;
    }
    let length = (diff - diff % min_length).min(max_length.max(1));
    Some((start, start + length - 1))
}

/// Handles the checkpoint task names and runs the no-ack loop.
#[derive(Debug, new)]
pub struct CheckpointProcessor {
    ctx: ProcessorContext,
    conf: CheckpointConf,
}

impl CheckpointProcessor {
    async fn process(&self, task: &Task) -> eyre::Result<TaskOutcome> {
        match &task.payload {
            TaskPayload::ProposeCheckpoint(header) => self.propose_checkpoint(header).await,
            TaskPayload::SendCheckpointToRootChain(checkpoint) => {
                self.send_checkpoint_to_root_chain(checkpoint).await
            }
            TaskPayload::CheckpointAck(logged) => self.send_checkpoint_ack(task.name(), logged).await,
            other => Err(eyre!("Task {} is not a checkpoint task", other.name())),
        }
    }

    /// End of the last checkpoint the root chain accepted, `None` before the
    /// first one.
    async fn last_root_chain_checkpoint_end(&self) -> eyre::Result<Option<u64>> {
        let current = self.ctx.root_chain.current_header_block().await?;
        if current == 0 {
            return Ok(None);
        }
        let header_block = self.ctx.root_chain.header_block(current).await?;
        Ok(Some(header_block.end))
    }

    #[instrument(skip_all, fields(number = header.number))]
    async fn propose_checkpoint(&self, header: &BlockHeader) -> eyre::Result<TaskOutcome> {
        let proposer = self.ctx.heimdall.current_proposer().await?;
        if proposer.signer != self.ctx.validator_address {
            debug!(proposer = ?proposer.signer, "Not the current proposer");
            return Ok(TaskOutcome::Success);
        }

        let params = self.ctx.heimdall.checkpoint_params().await?;
        if let Some(buffered) = self.ctx.heimdall.checkpoint_buffer().await? {
            let age = Utc::now().timestamp().saturating_sub(buffered.timestamp as i64);
            if age < params.checkpoint_buffer_time as i64 {
                info!(
                    start_block = buffered.start_block,
                    end_block = buffered.end_block,
                    age,
                    "Checkpoint already waiting in the buffer"
                );
                return Ok(TaskOutcome::Success);
            }
        }

        let last_end = self.last_root_chain_checkpoint_end().await?;
        let Some((start_block, end_block)) = next_checkpoint_range(
            last_end,
            header.number,
            self.conf.min_length,
            self.conf.max_length,
        ) else {
            debug!(?last_end, "Not enough blocks for a checkpoint yet");
            return Ok(TaskOutcome::Success);
        };

        let root_hash = self
            .ctx
            .execution_chain
            .root_hash(start_block, end_block)
            .await
            .with_context(|| format!("Computing root hash of [{start_block}, {end_block}]"))?;
        info!(start_block, end_block, ?root_hash, "Proposing checkpoint");
        self.ctx
            .broadcast_to_heimdall(HeimdallMsg::Checkpoint {
                proposer: self.ctx.validator_address,
                start_block,
                end_block,
                root_hash,
                bor_chain_id: self.ctx.bor_chain_id.clone(),
            })
            .await
    }

    #[instrument(skip_all, fields(start_block = checkpoint.start_block, end_block = checkpoint.end_block))]
    async fn send_checkpoint_to_root_chain(
        &self,
        checkpoint: &CheckpointEvent,
    ) -> eyre::Result<TaskOutcome> {
        if checkpoint.proposer != self.ctx.validator_address {
            debug!(proposer = ?checkpoint.proposer, "Checkpoint proposed by someone else");
            return Ok(TaskOutcome::Success);
        }

        let last_child_block = self.ctx.root_chain.last_child_block().await?;
        let continuous = last_child_block + 1 == checkpoint.start_block
            || (last_child_block == 0 && checkpoint.start_block == 0);
        if !continuous {
            info!(last_child_block, "Checkpoint does not follow the root chain, skipping");
            return Ok(TaskOutcome::Success);
        }

        let votes = self
            .ctx
            .heimdall
            .checkpoint_signatures(checkpoint.tx_hash)
            .await?;
        let signatures = votes
            .signatures
            .iter()
            .sorted_by_key(|sig| sig.signer)
            .map(|sig| {
                sig.to_rsv()
                    .ok_or_else(|| eyre!("Malformed signature from {:?}", sig.signer))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        let signers = signatures.len();
        let response = self
            .ctx
            .broadcaster
            .root_chain
            .broadcast(&RootChainCall::SubmitCheckpoint {
                vote_sign_bytes: votes.vote_sign_bytes,
                signatures,
            })
            .await?;
        if !response.is_ok() {
            return Err(eyre!(
                "Checkpoint submission rejected with code {}: {}",
                response.code,
                response.raw_log
            ));
        }
        info!(signers, tx_hash = ?response.tx_hash, "Submitted checkpoint to the root chain");
        Ok(TaskOutcome::Success)
    }

    async fn send_checkpoint_ack(
        &self,
        task: TaskName,
        logged: &Logged<NewHeaderBlockEvent>,
    ) -> eyre::Result<TaskOutcome> {
        let Logged { event, meta } = logged;
        if self
            .ctx
            .is_old_tx(task, meta.event_id(), EventFamily::Checkpoint)
            .await?
        {
            return Ok(TaskOutcome::Success);
        }
        if let Some(latest) = self.ctx.heimdall.latest_checkpoint().await? {
            if latest.end_block >= event.end {
                info!(
                    header_block_id = event.header_block_id,
                    end = event.end,
                    "Checkpoint already acknowledged"
                );
                return Ok(TaskOutcome::Success);
            }
        }

        let params = self.ctx.heimdall.checkpoint_params().await?;
        let number = event.header_block_id / params.child_block_interval.max(1);
        self.ctx
            .broadcast_to_heimdall(HeimdallMsg::CheckpointAck {
                from: self.ctx.validator_address,
                number,
                proposer: event.proposer,
                start_block: event.start,
                end_block: event.end,
                root_hash: event.root,
                tx_hash: meta.tx_hash,
                log_index: meta.log_index,
            })
            .await
    }

    /// Propose a no-ack when the last root chain checkpoint is older than
    /// the buffer time and this validator is among the proposers allowed to
    /// step in.
    pub async fn check_no_ack(&self) -> eyre::Result<()> {
        let current = self.ctx.root_chain.current_header_block().await?;
        if current == 0 {
            return Ok(());
        }
        let last = self.ctx.root_chain.header_block(current).await?;
        let params = self.ctx.heimdall.checkpoint_params().await?;

        let elapsed = Utc::now().timestamp().saturating_sub(last.created_at as i64).max(0) as u64;
        let count = elapsed / params.checkpoint_buffer_time.max(1);
        if count == 0 {
            return Ok(());
        }

        let proposers = self.ctx.heimdall.next_proposers(count).await?;
        if !proposers
            .iter()
            .any(|p| p.signer == self.ctx.validator_address)
        {
            debug!(count, "Not among the no-ack proposers");
            return Ok(());
        }
        info!(elapsed, count, "Checkpoint acknowledgement overdue, proposing no-ack");
        self.ctx
            .broadcast_to_heimdall(HeimdallMsg::CheckpointNoAck {
                from: self.ctx.validator_address,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CheckpointProcessor {
    #[instrument(skip_all, fields(processor = "checkpoint"))]
    async fn handle(&self, task: &Task) -> TaskOutcome {
        into_outcome(task.name(), self.process(task).await)
    }
}

impl Processor for CheckpointProcessor {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn spawn_loops(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let interval = self.conf.no_ack_poll_interval();
        vec![spawn_ticker(
            self,
            interval,
            shutdown,
            info_span!("CheckpointNoAck"),
            |this| async move { this.check_no_ack().await },
        )]
    }
}

impl TaskProcessor for CheckpointProcessor {
    fn task_names(&self) -> &'static [TaskName] {
        CHECKPOINT_TASKS
    }
}

#[cfg(test)]
mod tests {
    use bridge_core::{
        Checkpoint, CheckpointParams, CheckpointSignatures, HeaderBlock, LogMeta,
        ValidatorSignature, H160, H256, U256,
    };

    use crate::test_utils::{
        accepting_submitter, broadcaster, context_with, local_validator, ok_response, validator,
        MockExecutionChain, MockHeimdall, MockHeimdallSubmitter, MockRootChain,
        MockRootChainSubmitter,
    };

    use super::*;

    fn params() -> CheckpointParams {
        CheckpointParams::new(1000, 256, 1024, 10_000)
    }

    fn processor(
        heimdall: MockHeimdall,
        root_chain: MockRootChain,
        execution_chain: MockExecutionChain,
        heimdall_submitter: MockHeimdallSubmitter,
        root_chain_submitter: MockRootChainSubmitter,
    ) -> CheckpointProcessor {
        CheckpointProcessor::new(
            context_with(
                heimdall,
                root_chain,
                execution_chain,
                broadcaster(heimdall_submitter, root_chain_submitter),
            ),
            CheckpointConf::default(),
        )
    }

    fn task(payload: TaskPayload) -> Task {
        Task::new(payload, Utc::now(), 3)
    }

    #[test]
    fn first_checkpoint_starts_at_genesis() {
        assert_eq!(next_checkpoint_range(None, 1000, 256, 1024), Some((0, 767)));
    }

    #[test]
    fn range_continues_from_the_last_checkpoint() {
        assert_eq!(
            next_checkpoint_range(Some(767), 1100, 256, 1024),
            Some((768, 1023))
        );
        // capped at the max length
        assert_eq!(
            next_checkpoint_range(Some(767), 5000, 256, 1024),
            Some((768, 1791))
        );
    }

    #[test]
    fn short_or_stale_range_is_skipped() {
        assert_eq!(next_checkpoint_range(Some(767), 1000, 256, 1024), None);
        assert_eq!(next_checkpoint_range(Some(767), 500, 256, 1024), None);
    }

    fn proposer_heimdall(proposer: H160) -> MockHeimdall {
        let mut heimdall = MockHeimdall::new();
        heimdall
            .expect_current_proposer()
            .returning(move || Ok(validator(1, proposer, 0)));
        heimdall.expect_checkpoint_params().returning(|| Ok(params()));
        heimdall
    }

    fn root_chain_at(last_end: u64) -> MockRootChain {
        let mut root_chain = MockRootChain::new();
        root_chain.expect_current_header_block().returning(|| Ok(10_000));
        root_chain.expect_header_block().returning(move |_| {
            Ok(HeaderBlock::new(H256::zero(), 0, last_end, 0, H160::zero()))
        });
        root_chain
    }

    #[tokio::test]
    async fn proposer_proposes_the_next_range() {
        let mut heimdall = proposer_heimdall(local_validator());
        heimdall.expect_checkpoint_buffer().returning(|| Ok(None));
        let mut execution_chain = MockExecutionChain::new();
        execution_chain
            .expect_root_hash()
            .withf(|start, end| *start == 768 && *end == 1023)
            .returning(|_, _| Ok(H256::repeat_byte(9)));
        let mut submitter = MockHeimdallSubmitter::new();
        submitter
            .expect_sign_and_broadcast()
            .withf(|msg, _, _| {
                matches!(msg, HeimdallMsg::Checkpoint { start_block: 768, end_block: 1023, root_hash, .. }
                    if *root_hash == H256::repeat_byte(9))
            })
            .times(1)
            .returning(|_, _, _| Ok(ok_response()));
        let processor = processor(
            heimdall,
            root_chain_at(767),
            execution_chain,
            submitter,
            MockRootChainSubmitter::new(),
        );

        let outcome = processor
            .handle(&task(TaskPayload::ProposeCheckpoint(BlockHeader::at_height(1100, false))))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success));
    }

    #[tokio::test]
    async fn only_the_current_proposer_proposes() {
        let processor = processor(
            proposer_heimdall(H160::from_low_u64_be(0xdead)),
            MockRootChain::new(),
            MockExecutionChain::new(),
            MockHeimdallSubmitter::new(),
            MockRootChainSubmitter::new(),
        );
        let outcome = processor
            .handle(&task(TaskPayload::ProposeCheckpoint(BlockHeader::at_height(1100, false))))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success));
    }

    #[tokio::test]
    async fn fresh_buffered_checkpoint_blocks_a_new_proposal() {
        let mut heimdall = proposer_heimdall(local_validator());
        heimdall.expect_checkpoint_buffer().returning(|| {
            Ok(Some(Checkpoint::new(
                local_validator(),
                0,
                255,
                H256::zero(),
                "137".to_owned(),
                Utc::now().timestamp() as u64 - 10,
            )))
        });
        let processor = processor(
            heimdall,
            MockRootChain::new(),
            MockExecutionChain::new(),
            MockHeimdallSubmitter::new(),
            MockRootChainSubmitter::new(),
        );
        let outcome = processor
            .handle(&task(TaskPayload::ProposeCheckpoint(BlockHeader::at_height(1100, false))))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success));
    }

    fn signature(signer: u64) -> ValidatorSignature {
        let mut bytes = vec![0u8; 65];
        bytes[31] = signer as u8;
        bytes[64] = 27;
        ValidatorSignature::new(H160::from_low_u64_be(signer), bytes)
    }

    fn checkpoint_event(start_block: u64) -> CheckpointEvent {
        CheckpointEvent::new(
            H256::from_low_u64_be(0xc0),
            50,
            local_validator(),
            start_block,
            start_block + 255,
            H256::repeat_byte(1),
        )
    }

    #[tokio::test]
    async fn signatures_are_submitted_in_signer_order() {
        let mut heimdall = MockHeimdall::new();
        heimdall.expect_checkpoint_signatures().returning(|_| {
            Ok(CheckpointSignatures::new(
                vec![0xfe],
                vec![signature(3), signature(1), signature(2)],
            ))
        });
        let mut root_chain = MockRootChain::new();
        root_chain.expect_last_child_block().returning(|| Ok(767));
        let mut root_submitter = MockRootChainSubmitter::new();
        root_submitter
            .expect_send()
            .withf(|call, nonce| {
                let RootChainCall::SubmitCheckpoint { signatures, vote_sign_bytes } = call;
                let rs: Vec<_> = signatures.iter().map(|[r, _, _]| *r).collect();
                *nonce == 0
                    && vote_sign_bytes == &vec![0xfe]
                    && rs == vec![U256::from(1), U256::from(2), U256::from(3)]
            })
            .times(1)
            .returning(|_, _| Ok(ok_response()));
        let processor = processor(
            heimdall,
            root_chain,
            MockExecutionChain::new(),
            MockHeimdallSubmitter::new(),
            root_submitter,
        );

        let outcome = processor
            .handle(&task(TaskPayload::SendCheckpointToRootChain(checkpoint_event(768))))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success));
    }

    #[tokio::test]
    async fn first_checkpoint_may_start_at_zero_or_one() {
        for start_block in [0, 1] {
            let mut heimdall = MockHeimdall::new();
            heimdall
                .expect_checkpoint_signatures()
                .returning(|_| Ok(CheckpointSignatures::new(vec![0xfe], vec![signature(1)])));
            let mut root_chain = MockRootChain::new();
            root_chain.expect_last_child_block().returning(|| Ok(0));
            let mut root_submitter = MockRootChainSubmitter::new();
            root_submitter
                .expect_send()
                .times(1)
                .returning(|_, _| Ok(ok_response()));
            let processor = processor(
                heimdall,
                root_chain,
                MockExecutionChain::new(),
                MockHeimdallSubmitter::new(),
                root_submitter,
            );

            let outcome = processor
                .handle(&task(TaskPayload::SendCheckpointToRootChain(checkpoint_event(
                    start_block,
                ))))
                .await;
            assert!(matches!(outcome, TaskOutcome::Success), "start {start_block}");
        }
    }

    #[tokio::test]
    async fn discontinuous_checkpoint_is_not_submitted() {
        let mut root_chain = MockRootChain::new();
        root_chain.expect_last_child_block().returning(|| Ok(1023));
        let processor = processor(
            MockHeimdall::new(),
            root_chain,
            MockExecutionChain::new(),
            MockHeimdallSubmitter::new(),
            MockRootChainSubmitter::new(),
        );
        let outcome = processor
            .handle(&task(TaskPayload::SendCheckpointToRootChain(checkpoint_event(768))))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success));
    }

    fn ack_task(end: u64) -> Task {
        task(TaskPayload::CheckpointAck(Logged::new(
            NewHeaderBlockEvent {
                proposer: local_validator(),
                header_block_id: 20_000,
                reward: U256::zero(),
                start: 768,
                end,
                root: H256::repeat_byte(2),
            },
            LogMeta::new(H160::zero(), 900, H256::from_low_u64_be(0xac), 4),
        )))
    }

    #[tokio::test]
    async fn ack_is_numbered_by_the_child_block_interval() {
        let mut heimdall = MockHeimdall::new();
        heimdall.expect_is_old_tx().returning(|_, _, _| Ok(false));
        heimdall.expect_latest_checkpoint().returning(|| Ok(None));
        heimdall.expect_checkpoint_params().returning(|| Ok(params()));
        let mut submitter = MockHeimdallSubmitter::new();
        submitter
            .expect_sign_and_broadcast()
            .withf(|msg, _, _| matches!(msg, HeimdallMsg::CheckpointAck { number: 2, end_block: 1023, .. }))
            .times(1)
            .returning(|_, _, _| Ok(ok_response()));
        let processor = processor(
            heimdall,
            MockRootChain::new(),
            MockExecutionChain::new(),
            submitter,
            MockRootChainSubmitter::new(),
        );
        assert!(matches!(
            processor.handle(&ack_task(1023)).await,
            TaskOutcome::Success
        ));
    }

    #[tokio::test]
    async fn covered_ack_is_skipped() {
        let mut heimdall = MockHeimdall::new();
        heimdall.expect_is_old_tx().returning(|_, _, _| Ok(false));
        heimdall.expect_latest_checkpoint().returning(|| {
            Ok(Some(Checkpoint::new(
                local_validator(),
                768,
                1023,
                H256::zero(),
                "137".to_owned(),
                0,
            )))
        });
        let processor = processor(
            heimdall,
            MockRootChain::new(),
            MockExecutionChain::new(),
            MockHeimdallSubmitter::new(),
            MockRootChainSubmitter::new(),
        );
        assert!(matches!(
            processor.handle(&ack_task(1023)).await,
            TaskOutcome::Success
        ));
    }

    fn no_ack_processor(proposers: Vec<H160>, submitter: MockHeimdallSubmitter) -> CheckpointProcessor {
        let mut root_chain = MockRootChain::new();
        root_chain.expect_current_header_block().returning(|| Ok(10_000));
        let created_at = Utc::now().timestamp() as u64 - 2500;
        root_chain.expect_header_block().returning(move |_| {
            Ok(HeaderBlock::new(H256::zero(), 0, 767, created_at, H160::zero()))
        });
        let mut heimdall = MockHeimdall::new();
        heimdall.expect_checkpoint_params().returning(|| Ok(params()));
        heimdall
            .expect_next_proposers()
            .withf(|count| *count == 2)
            .returning(move |_| {
                Ok(proposers
                    .iter()
                    .enumerate()
                    .map(|(i, signer)| validator(i as u64, *signer, 0))
                    .collect())
            });
        processor(
            heimdall,
            root_chain,
            MockExecutionChain::new(),
            submitter,
            MockRootChainSubmitter::new(),
        )
    }

    #[tokio::test]
    async fn overdue_ack_is_replaced_by_a_no_ack() {
        let processor = no_ack_processor(
            vec![H160::from_low_u64_be(1), local_validator()],
            accepting_submitter(1),
        );
        processor.check_no_ack().await.unwrap();
    }

    #[tokio::test]
    async fn no_ack_is_left_to_the_rotation() {
        let processor = no_ack_processor(
            vec![H160::from_low_u64_be(1), H160::from_low_u64_be(2)],
            MockHeimdallSubmitter::new(),
        );
        processor.check_no_ack().await.unwrap();
    }
}
