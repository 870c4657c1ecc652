use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{BlockHeader, BlockRequest, ChainResult, H256};

/// Read access to the execution chain.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait ExecutionChainClient: Send + Sync + Debug {
    /// Fetch a header.
    async fn header_by_number(&self, request: BlockRequest) -> ChainResult<BlockHeader>;

    /// Merkle root over the headers in `[start, end]`, as committed in a
    /// checkpoint.
    async fn root_hash(&self, start: u64, end: u64) -> ChainResult<H256>;

    /// Id of the span the execution chain is currently producing blocks in.
    async fn current_span_id(&self) -> ChainResult<u64>;
}
