use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;

use crate::{
    Account, BlockHeader, BlockRequest, ChainKind, ChainManagerParams, ChainResult, Checkpoint,
    CheckpointParams, CheckpointSignatures, ConsensusEvent, EventFamily, ExecutionChainClient,
    HeaderBlock, HeimdallClient, HeimdallMsg, HeimdallTxSubmitter, Milestone, RawLog,
    RootChainCall, RootChainClient, RootChainEvent, RootChainTxSubmitter, Span, TxResponse,
    Validator, ValidatorSet, H160, H256,
};

use super::call_with_timeout;

/// Default deadline of a single chain request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps a chain-access capability so every request it makes is bounded by
/// `timeout`. An elapsed deadline is reported as
/// [`ChainCommunicationError::Timeout`](crate::ChainCommunicationError::Timeout),
/// which is transient.
#[derive(Debug, Clone, new)]
pub struct WithTimeout<C> {
    inner: C,
    timeout: Duration,
}

impl<C> WithTimeout<C> {
    async fn bounded<T>(
        &self,
        chain: ChainKind,
        fut: impl std::future::Future<Output = ChainResult<T>>,
    ) -> ChainResult<T> {
        call_with_timeout(chain, self.timeout, fut).await
    }
}

#[async_trait]
impl<C: RootChainClient> RootChainClient for WithTimeout<C> {
    async fn header_by_number(&self, request: BlockRequest) -> ChainResult<BlockHeader> {
        self.bounded(ChainKind::RootChain, self.inner.header_by_number(request))
            .await
    }

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[H160],
    ) -> ChainResult<Vec<RawLog>> {
        self.bounded(ChainKind::RootChain, self.inner.filter_logs(from, to, addresses))
            .await
    }

    fn decode_event(&self, log: &RawLog) -> ChainResult<Option<RootChainEvent>> {
        self.inner.decode_event(log)
    }

    async fn transaction_logs(&self, tx_hash: H256) -> ChainResult<Vec<RawLog>> {
        self.bounded(ChainKind::RootChain, self.inner.transaction_logs(tx_hash))
            .await
    }

    async fn current_header_block(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::RootChain, self.inner.current_header_block())
            .await
    }

    async fn header_block(&self, header_block_id: u64) -> ChainResult<HeaderBlock> {
        self.bounded(ChainKind::RootChain, self.inner.header_block(header_block_id))
            .await
    }

    async fn last_child_block(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::RootChain, self.inner.last_child_block())
            .await
    }
}

#[async_trait]
impl<C: RootChainTxSubmitter> RootChainTxSubmitter for WithTimeout<C> {
    fn address(&self) -> H160 {
        self.inner.address()
    }

    async fn pending_nonce(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::RootChain, self.inner.pending_nonce())
            .await
    }

    async fn send(&self, call: &RootChainCall, nonce: u64) -> ChainResult<TxResponse> {
        self.bounded(ChainKind::RootChain, self.inner.send(call, nonce))
            .await
    }
}

#[async_trait]
impl<C: ExecutionChainClient> ExecutionChainClient for WithTimeout<C> {
    async fn header_by_number(&self, request: BlockRequest) -> ChainResult<BlockHeader> {
        self.bounded(ChainKind::ExecutionChain, self.inner.header_by_number(request))
            .await
    }

    async fn root_hash(&self, start: u64, end: u64) -> ChainResult<H256> {
        self.bounded(ChainKind::ExecutionChain, self.inner.root_hash(start, end))
            .await
    }

    async fn current_span_id(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::ExecutionChain, self.inner.current_span_id())
            .await
    }
}

#[async_trait]
impl<C: HeimdallClient> HeimdallClient for WithTimeout<C> {
    async fn account(&self, address: H160) -> ChainResult<Option<Account>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.account(address))
            .await
    }

    async fn is_old_tx(
        &self,
        tx_hash: H256,
        log_index: u64,
        family: EventFamily,
    ) -> ChainResult<bool> {
        self.bounded(
            ChainKind::ConsensusChain,
            self.inner.is_old_tx(tx_hash, log_index, family),
        )
        .await
    }

    async fn unconfirmed_tx_count(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::ConsensusChain, self.inner.unconfirmed_tx_count())
            .await
    }

    async fn unconfirmed_txs(&self) -> ChainResult<Vec<HeimdallMsg>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.unconfirmed_txs())
            .await
    }

    async fn validator(&self, id: u64) -> ChainResult<Option<Validator>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.validator(id))
            .await
    }

    async fn validator_set(&self) -> ChainResult<ValidatorSet> {
        self.bounded(ChainKind::ConsensusChain, self.inner.validator_set())
            .await
    }

    async fn current_proposer(&self) -> ChainResult<Validator> {
        self.bounded(ChainKind::ConsensusChain, self.inner.current_proposer())
            .await
    }

    async fn next_proposers(&self, count: u64) -> ChainResult<Vec<Validator>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.next_proposers(count))
            .await
    }

    async fn checkpoint_buffer(&self) -> ChainResult<Option<Checkpoint>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.checkpoint_buffer())
            .await
    }

    async fn latest_checkpoint(&self) -> ChainResult<Option<Checkpoint>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.latest_checkpoint())
            .await
    }

    async fn checkpoint_params(&self) -> ChainResult<CheckpointParams> {
        self.bounded(ChainKind::ConsensusChain, self.inner.checkpoint_params())
            .await
    }

    async fn checkpoint_signatures(&self, tx_hash: H256) -> ChainResult<CheckpointSignatures> {
        self.bounded(
            ChainKind::ConsensusChain,
            self.inner.checkpoint_signatures(tx_hash),
        )
        .await
    }

    async fn latest_milestone(&self) -> ChainResult<Option<Milestone>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.latest_milestone())
            .await
    }

    async fn last_milestone_timeout(&self) -> ChainResult<Option<u64>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.last_milestone_timeout())
            .await
    }

    async fn latest_span(&self) -> ChainResult<Span> {
        self.bounded(ChainKind::ConsensusChain, self.inner.latest_span())
            .await
    }

    async fn next_span_seed(&self, span_id: u64) -> ChainResult<H256> {
        self.bounded(ChainKind::ConsensusChain, self.inner.next_span_seed(span_id))
            .await
    }

    async fn chain_manager_params(&self) -> ChainResult<ChainManagerParams> {
        self.bounded(ChainKind::ConsensusChain, self.inner.chain_manager_params())
            .await
    }

    async fn last_event_record_id(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::ConsensusChain, self.inner.last_event_record_id())
            .await
    }

    async fn event_record_exists(&self, id: u64) -> ChainResult<bool> {
        self.bounded(ChainKind::ConsensusChain, self.inner.event_record_exists(id))
            .await
    }

    async fn latest_block_height(&self) -> ChainResult<u64> {
        self.bounded(ChainKind::ConsensusChain, self.inner.latest_block_height())
            .await
    }

    async fn block_events(&self, from: u64, to: u64) -> ChainResult<Vec<ConsensusEvent>> {
        self.bounded(ChainKind::ConsensusChain, self.inner.block_events(from, to))
            .await
    }
}

#[async_trait]
impl<C: HeimdallTxSubmitter> HeimdallTxSubmitter for WithTimeout<C> {
    fn address(&self) -> H160 {
        self.inner.address()
    }

    async fn sign_and_broadcast(
        &self,
        msg: &HeimdallMsg,
        account_number: u64,
        sequence: u64,
    ) -> ChainResult<TxResponse> {
        self.bounded(
            ChainKind::ConsensusChain,
            self.inner.sign_and_broadcast(msg, account_number, sequence),
        )
        .await
    }
}
