use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{
    Account, ChainManagerParams, ChainResult, Checkpoint, CheckpointParams, CheckpointSignatures,
    ConsensusEvent, EventFamily, HeimdallMsg, Milestone, Span, TxResponse, Validator,
    ValidatorSet, H160, H256,
};

/// Read access to the validator consensus chain and its modules.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait HeimdallClient: Send + Sync + Debug {
    /// Account by address, `None` if the account does not exist yet.
    async fn account(&self, address: H160) -> ChainResult<Option<Account>>;

    /// Whether the root chain log `(tx_hash, log_index)` has already been
    /// applied for `family`.
    async fn is_old_tx(
        &self,
        tx_hash: H256,
        log_index: u64,
        family: EventFamily,
    ) -> ChainResult<bool>;

    /// Number of transactions in the mempool.
    async fn unconfirmed_tx_count(&self) -> ChainResult<u64>;

    /// Messages of every transaction in the mempool, decoded.
    async fn unconfirmed_txs(&self) -> ChainResult<Vec<HeimdallMsg>>;

    /// Validator by id, `None` if unknown.
    async fn validator(&self, id: u64) -> ChainResult<Option<Validator>>;

    /// The current validator set.
    async fn validator_set(&self) -> ChainResult<ValidatorSet>;

    /// The validator whose turn it is to propose.
    async fn current_proposer(&self) -> ChainResult<Validator>;

    /// The next `count` proposers, starting with the current one.
    async fn next_proposers(&self, count: u64) -> ChainResult<Vec<Validator>>;

    /// The checkpoint waiting for a root chain acknowledgement, if any.
    async fn checkpoint_buffer(&self) -> ChainResult<Option<Checkpoint>>;

    /// The latest acknowledged checkpoint, if any.
    async fn latest_checkpoint(&self) -> ChainResult<Option<Checkpoint>>;

    /// Checkpoint module parameters.
    async fn checkpoint_params(&self) -> ChainResult<CheckpointParams>;

    /// Votes collected for the checkpoint transaction `tx_hash`.
    async fn checkpoint_signatures(&self, tx_hash: H256) -> ChainResult<CheckpointSignatures>;

    /// The latest milestone, if any.
    async fn latest_milestone(&self) -> ChainResult<Option<Milestone>>;

    /// Unix time of the last milestone timeout, if any.
    async fn last_milestone_timeout(&self) -> ChainResult<Option<u64>>;

    /// The latest span.
    async fn latest_span(&self) -> ChainResult<Span>;

    /// Seed for producer selection of span `span_id`.
    async fn next_span_seed(&self, span_id: u64) -> ChainResult<H256>;

    /// Chain manager parameters: contract addresses and chain ids.
    async fn chain_manager_params(&self) -> ChainResult<ChainManagerParams>;

    /// Id of the latest state sync record applied.
    async fn last_event_record_id(&self) -> ChainResult<u64>;

    /// Whether state sync record `id` has been applied.
    async fn event_record_exists(&self, id: u64) -> ChainResult<bool>;

    /// Height of the latest committed block.
    async fn latest_block_height(&self) -> ChainResult<u64>;

    /// Begin/end-block events emitted in the inclusive range `[from, to]`.
    async fn block_events(&self, from: u64, to: u64) -> ChainResult<Vec<ConsensusEvent>>;
}

/// Signs and broadcasts consensus chain transactions from the validator's
/// account.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait HeimdallTxSubmitter: Send + Sync + Debug {
    /// The signing account.
    fn address(&self) -> H160;

    /// Build a transaction carrying `msg`, sign it with
    /// `(account_number, sequence)` and broadcast it.
    async fn sign_and_broadcast(
        &self,
        msg: &HeimdallMsg,
        account_number: u64,
        sequence: u64,
    ) -> ChainResult<TxResponse>;
}
