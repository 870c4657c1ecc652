use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{
    BlockHeader, BlockRequest, ChainResult, HeaderBlock, RawLog, RootChainCall, RootChainEvent,
    TxResponse, H160, H256,
};

/// Read access to the root chain and its bridge contracts.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait RootChainClient: Send + Sync + Debug {
    /// Fetch a header. Chains without a finality tag fail on
    /// [`BlockRequest::Finalized`].
    async fn header_by_number(&self, request: BlockRequest) -> ChainResult<BlockHeader>;

    /// Logs emitted by any of `addresses` in the inclusive range `[from, to]`.
    async fn filter_logs(&self, from: u64, to: u64, addresses: &[H160])
        -> ChainResult<Vec<RawLog>>;

    /// Resolve the log's signature topic against the tracked contract ABIs.
    /// Returns `Ok(None)` when the topic is not one the bridge relays.
    fn decode_event(&self, log: &RawLog) -> ChainResult<Option<RootChainEvent>>;

    /// All logs emitted by a transaction, taken from its receipt.
    async fn transaction_logs(&self, tx_hash: H256) -> ChainResult<Vec<RawLog>>;

    /// Id of the latest header block (checkpoint) stored by the root chain
    /// contract.
    async fn current_header_block(&self) -> ChainResult<u64>;

    /// Header block info by id.
    async fn header_block(&self, header_block_id: u64) -> ChainResult<HeaderBlock>;

    /// End block of the latest checkpoint accepted by the root chain.
    async fn last_child_block(&self) -> ChainResult<u64>;
}

/// Signs and submits root chain transactions from the validator's account.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait RootChainTxSubmitter: Send + Sync + Debug {
    /// The submitting account.
    fn address(&self) -> H160;

    /// Next nonce of the submitting account including pending transactions.
    async fn pending_nonce(&self) -> ChainResult<u64>;

    /// Sign `call` with `nonce` and send it.
    async fn send(&self, call: &RootChainCall, nonce: u64) -> ChainResult<TxResponse>;
}
