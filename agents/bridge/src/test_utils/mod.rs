use std::future::pending;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_base::{
    db::MemoryCursorStore,
    queue::{MemoryTaskBroker, TaskHandler, TaskQueue, TaskQueueConf},
    CoreMetrics,
};
use bridge_core::{
    Account, BlockHeader, BlockRequest, ChainManagerParams, ChainResult, Checkpoint,
    CheckpointParams, CheckpointSignatures, ConsensusEvent, EventFamily, HeaderBlock,
    HeaderBlockEntry, HeimdallClient, HeimdallMsg, HeimdallTxSubmitter, LogMeta, Milestone,
    RawLog, RootChainCall, RootChainClient, RootChainEvent, RootChainTxSubmitter, Span,
    StakeUpdateEntry, StateSyncedEntry, SubgraphClient, Task, TaskName, TaskOutcome, TxResponse,
    Validator, ValidatorSet, ExecutionChainClient, H160, H256,
};
use prometheus::Registry;

use crate::{
    broadcaster::{AccountSequenceState, Broadcaster, HeimdallBroadcaster, RootChainBroadcaster},
    processor::ProcessorContext,
    settings::DelayConf,
};

mockall::mock! {
    pub RootChain {}

    impl std::fmt::Debug for RootChain {
        fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
    }

    #[async_trait]
    impl RootChainClient for RootChain {
        async fn header_by_number(&self, request: BlockRequest) -> ChainResult<BlockHeader>;
        async fn filter_logs(&self, from: u64, to: u64, addresses: &[H160]) -> ChainResult<Vec<RawLog>>;
        fn decode_event(&self, log: &RawLog) -> ChainResult<Option<RootChainEvent>>;
        async fn transaction_logs(&self, tx_hash: H256) -> ChainResult<Vec<RawLog>>;
        async fn current_header_block(&self) -> ChainResult<u64>;
        async fn header_block(&self, header_block_id: u64) -> ChainResult<HeaderBlock>;
        async fn last_child_block(&self) -> ChainResult<u64>;
    }
}

mockall::mock! {
    pub RootChainSubmitter {}

    impl std::fmt::Debug for RootChainSubmitter {
        fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
    }

    #[async_trait]
    impl RootChainTxSubmitter for RootChainSubmitter {
        fn address(&self) -> H160;
        async fn pending_nonce(&self) -> ChainResult<u64>;
        async fn send(&self, call: &RootChainCall, nonce: u64) -> ChainResult<TxResponse>;
    }
}

mockall::mock! {
    pub ExecutionChain {}

    impl std::fmt::Debug for ExecutionChain {
        fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
    }

    #[async_trait]
    impl ExecutionChainClient for ExecutionChain {
        async fn header_by_number(&self, request: BlockRequest) -> ChainResult<BlockHeader>;
        async fn root_hash(&self, start: u64, end: u64) -> ChainResult<H256>;
        async fn current_span_id(&self) -> ChainResult<u64>;
    }
}

mockall::mock! {
    pub Heimdall {}

    impl std::fmt::Debug for Heimdall {
        fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
    }

    #[async_trait]
    impl HeimdallClient for Heimdall {
        async fn account(&self, address: H160) -> ChainResult<Option<Account>>;
        async fn is_old_tx(&self, tx_hash: H256, log_index: u64, family: EventFamily) -> ChainResult<bool>;
        async fn unconfirmed_tx_count(&self) -> ChainResult<u64>;
        async fn unconfirmed_txs(&self) -> ChainResult<Vec<HeimdallMsg>>;
        async fn validator(&self, id: u64) -> ChainResult<Option<Validator>>;
        async fn validator_set(&self) -> ChainResult<ValidatorSet>;
        async fn current_proposer(&self) -> ChainResult<Validator>;
        async fn next_proposers(&self, count: u64) -> ChainResult<Vec<Validator>>;
        async fn checkpoint_buffer(&self) -> ChainResult<Option<Checkpoint>>;
        async fn latest_checkpoint(&self) -> ChainResult<Option<Checkpoint>>;
        async fn checkpoint_params(&self) -> ChainResult<CheckpointParams>;
        async fn checkpoint_signatures(&self, tx_hash: H256) -> ChainResult<CheckpointSignatures>;
        async fn latest_milestone(&self) -> ChainResult<Option<Milestone>>;
        async fn last_milestone_timeout(&self) -> ChainResult<Option<u64>>;
        async fn latest_span(&self) -> ChainResult<Span>;
        async fn next_span_seed(&self, span_id: u64) -> ChainResult<H256>;
        async fn chain_manager_params(&self) -> ChainResult<ChainManagerParams>;
        async fn last_event_record_id(&self) -> ChainResult<u64>;
        async fn event_record_exists(&self, id: u64) -> ChainResult<bool>;
        async fn latest_block_height(&self) -> ChainResult<u64>;
        async fn block_events(&self, from: u64, to: u64) -> ChainResult<Vec<ConsensusEvent>>;
    }
}

mockall::mock! {
    pub HeimdallSubmitter {}

    impl std::fmt::Debug for HeimdallSubmitter {
        fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
    }

    #[async_trait]
    impl HeimdallTxSubmitter for HeimdallSubmitter {
        fn address(&self) -> H160;
        async fn sign_and_broadcast(&self, msg: &HeimdallMsg, account_number: u64, sequence: u64) -> ChainResult<TxResponse>;
    }
}

mockall::mock! {
    pub Subgraph {}

    impl std::fmt::Debug for Subgraph {
        fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
    }

    #[async_trait]
    impl SubgraphClient for Subgraph {
        async fn latest_state_synced_id(&self) -> ChainResult<Option<u64>>;
        async fn state_synced_by_id(&self, state_id: u64) -> ChainResult<Option<StateSyncedEntry>>;
        async fn latest_stake_update(&self, validator_id: u64) -> ChainResult<Option<StakeUpdateEntry>>;
        async fn stake_update_by_nonce(&self, validator_id: u64, nonce: u64) -> ChainResult<Option<StakeUpdateEntry>>;
        async fn latest_header_block(&self) -> ChainResult<Option<HeaderBlockEntry>>;
    }
}

/// A consensus chain endpoint that accepts every request and never answers.
#[derive(Debug)]
pub struct UnresponsiveHeimdall;

#[async_trait]
impl HeimdallClient for UnresponsiveHeimdall {
    async fn account(&self, _address: H160) -> ChainResult<Option<Account>> {
        pending().await
    }

    async fn is_old_tx(
        &self,
        _tx_hash: H256,
        _log_index: u64,
        _family: EventFamily,
    ) -> ChainResult<bool> {
        pending().await
    }

    async fn unconfirmed_tx_count(&self) -> ChainResult<u64> {
        pending().await
    }

    async fn unconfirmed_txs(&self) -> ChainResult<Vec<HeimdallMsg>> {
        pending().await
    }

    async fn validator(&self, _id: u64) -> ChainResult<Option<Validator>> {
        pending().await
    }

    async fn validator_set(&self) -> ChainResult<ValidatorSet> {
        pending().await
    }

    async fn current_proposer(&self) -> ChainResult<Validator> {
        pending().await
    }

    async fn next_proposers(&self, _count: u64) -> ChainResult<Vec<Validator>> {
        pending().await
    }

    async fn checkpoint_buffer(&self) -> ChainResult<Option<Checkpoint>> {
        pending().await
    }

    async fn latest_checkpoint(&self) -> ChainResult<Option<Checkpoint>> {
        pending().await
    }

    async fn checkpoint_params(&self) -> ChainResult<CheckpointParams> {
        pending().await
    }

    async fn checkpoint_signatures(&self, _tx_hash: H256) -> ChainResult<CheckpointSignatures> {
        pending().await
    }

    async fn latest_milestone(&self) -> ChainResult<Option<Milestone>> {
        pending().await
    }

    async fn last_milestone_timeout(&self) -> ChainResult<Option<u64>> {
        pending().await
    }

    async fn latest_span(&self) -> ChainResult<Span> {
        pending().await
    }

    async fn next_span_seed(&self, _span_id: u64) -> ChainResult<H256> {
        pending().await
    }

    async fn chain_manager_params(&self) -> ChainResult<ChainManagerParams> {
        pending().await
    }

    async fn last_event_record_id(&self) -> ChainResult<u64> {
        pending().await
    }

    async fn event_record_exists(&self, _id: u64) -> ChainResult<bool> {
        pending().await
    }

    async fn latest_block_height(&self) -> ChainResult<u64> {
        pending().await
    }

    async fn block_events(&self, _from: u64, _to: u64) -> ChainResult<Vec<ConsensusEvent>> {
        pending().await
    }
}

/// Address of the validator the tests run as.
pub fn local_validator() -> H160 {
    H160::from_low_u64_be(0x10)
}

/// Metrics on a throwaway registry.
pub fn test_metrics() -> CoreMetrics {
    CoreMetrics::new("test", 0, Registry::new()).unwrap()
}

/// A handler accepting every task without doing anything.
#[derive(Debug)]
pub struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    async fn handle(&self, _task: &Task) -> TaskOutcome {
        TaskOutcome::Success
    }
}

/// An in-memory task queue accepting every task name, together with its
/// broker so tests can inspect what was enqueued.
pub fn test_queue() -> (Arc<TaskQueue>, Arc<MemoryTaskBroker>) {
    let broker = Arc::new(MemoryTaskBroker::default());
    let queue = Arc::new(TaskQueue::new(
        broker.clone(),
        TaskQueueConf::default(),
        &test_metrics(),
    ));
    for name in [
        TaskName::ValidatorJoin,
        TaskName::StakeUpdate,
        TaskName::SignerChange,
        TaskName::UnstakeInit,
        TaskName::StateSynced,
        TaskName::TopUpFee,
        TaskName::CheckpointAck,
        TaskName::ProposeCheckpoint,
        TaskName::SendCheckpointToRootChain,
    ] {
        queue.register_task(name, Arc::new(NoopHandler));
    }
    (queue, broker)
}

/// Every task in `broker`, earliest first.
pub fn drain(broker: &MemoryTaskBroker) -> Vec<Task> {
    use bridge_base::queue::TaskBroker;

    let far_future = chrono::Utc::now() + chrono::Duration::days(3650);
    let mut tasks = vec![];
    while let Some(task) = broker.pop_due(far_future).unwrap() {
        tasks.push(task);
    }
    tasks
}

/// A fresh in-memory cursor store.
pub fn test_cursors() -> Arc<MemoryCursorStore> {
    Arc::new(MemoryCursorStore::default())
}

/// A log emitted at `block` by `tx`.
pub fn raw_log(block: u64, tx: u64, log_index: u64) -> RawLog {
    RawLog::new(
        vec![H256::from_low_u64_be(0xfeed)],
        vec![],
        LogMeta::new(
            H160::from_low_u64_be(0xc0),
            block,
            H256::from_low_u64_be(tx),
            log_index,
        ),
    )
}

/// A validator with the given id, signer and confirmed nonce.
pub fn validator(id: u64, signer: H160, nonce: u64) -> Validator {
    Validator::new(id, signer, nonce, 100)
}

/// A set of `position - 1` unrelated validators followed by the local one.
pub fn set_with_local_at(position: u64) -> ValidatorSet {
    let mut validators: Vec<Validator> = (1..position)
        .map(|i| validator(i, H160::from_low_u64_be(0x1000 + i), 0))
        .collect();
    validators.push(validator(position, local_validator(), 0));
    ValidatorSet::new(validators)
}

/// A broadcaster over the given submitters, starting at sequence and nonce 0.
/// Sequence refreshes report sequence 0.
pub fn broadcaster(
    mut heimdall_submitter: MockHeimdallSubmitter,
    mut root_chain_submitter: MockRootChainSubmitter,
) -> Broadcaster {
    let metrics = test_metrics();
    heimdall_submitter
        .expect_address()
        .return_const(local_validator());
    root_chain_submitter
        .expect_address()
        .return_const(local_validator());
    root_chain_submitter.expect_pending_nonce().returning(|| Ok(0));
    let mut accounts = MockHeimdall::new();
    accounts
        .expect_account()
        .returning(|address| Ok(Some(Account::new(address, 1, 0))));
    Broadcaster {
        heimdall: HeimdallBroadcaster::with_state(
            Arc::new(heimdall_submitter),
            Arc::new(accounts),
            AccountSequenceState::default(),
            &metrics,
        ),
        root_chain: RootChainBroadcaster::with_nonce(Arc::new(root_chain_submitter), 0, &metrics),
    }
}

/// A consensus chain submitter accepting everything, counting submissions.
pub fn accepting_submitter(times: usize) -> MockHeimdallSubmitter {
    let mut submitter = MockHeimdallSubmitter::new();
    submitter
        .expect_sign_and_broadcast()
        .times(times)
        .returning(|_, _, _| Ok(ok_response()));
    submitter
}

/// An OK transaction response
pub fn ok_response() -> TxResponse {
    TxResponse::new(H256::from_low_u64_be(0xbeef), TxResponse::CODE_OK, String::new())
}

/// A processor context over the given chains, broadcasting nowhere.
pub fn context(
    heimdall: MockHeimdall,
    root_chain: MockRootChain,
    execution_chain: MockExecutionChain,
) -> ProcessorContext {
    context_with(
        heimdall,
        root_chain,
        execution_chain,
        broadcaster(MockHeimdallSubmitter::new(), MockRootChainSubmitter::new()),
    )
}

/// A processor context over the given chains and broadcaster.
pub fn context_with(
    heimdall: MockHeimdall,
    root_chain: MockRootChain,
    execution_chain: MockExecutionChain,
    broadcaster: Broadcaster,
) -> ProcessorContext {
    ProcessorContext {
        validator_address: local_validator(),
        bor_chain_id: "137".to_owned(),
        heimdall: Arc::new(heimdall),
        root_chain: Arc::new(root_chain),
        execution_chain: Arc::new(execution_chain),
        broadcaster: Arc::new(broadcaster),
        delays: DelayConf::default(),
    }
}
