use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::{ChainResult, H256};

/// Where an indexed root chain event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct IndexedLog {
    /// Emitting transaction
    pub tx_hash: H256,
    /// Block the transaction was included in
    pub block_number: u64,
    /// Index of the log within its block
    pub log_index: u64,
}

/// An indexed `StateSynced` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct StateSyncedEntry {
    /// State sync id
    pub state_id: u64,
    /// Where it was emitted
    pub log: IndexedLog,
}

/// An indexed `StakeUpdate` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct StakeUpdateEntry {
    /// Validator the update applies to
    pub validator_id: u64,
    /// Staking nonce after the update
    pub nonce: u64,
    /// Where it was emitted
    pub log: IndexedLog,
}

/// An indexed root chain header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct HeaderBlockEntry {
    /// Header block id
    pub id: u64,
    /// First block covered
    pub start: u64,
    /// Last block covered
    pub end: u64,
}

/// An external index over root chain bridge events.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait SubgraphClient: Send + Sync + Debug {
    /// Id of the latest `StateSynced` event, `None` before the first one.
    async fn latest_state_synced_id(&self) -> ChainResult<Option<u64>>;

    /// The `StateSynced` event with id `state_id`.
    async fn state_synced_by_id(&self, state_id: u64) -> ChainResult<Option<StateSyncedEntry>>;

    /// The latest `StakeUpdate` of `validator_id`.
    async fn latest_stake_update(&self, validator_id: u64)
        -> ChainResult<Option<StakeUpdateEntry>>;

    /// The `StakeUpdate` of `validator_id` carrying `nonce`.
    async fn stake_update_by_nonce(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> ChainResult<Option<StakeUpdateEntry>>;

    /// The latest header block.
    async fn latest_header_block(&self) -> ChainResult<Option<HeaderBlockEntry>>;
}
