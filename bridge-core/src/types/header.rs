use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::H256;

/// A block header as observed by a listener. Headers are consumed once and
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct BlockHeader {
    /// Block height
    pub number: u64,
    /// Block hash
    pub hash: H256,
    /// Hash of the parent block
    pub parent_hash: H256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Whether the chain reported this header as finalized
    pub is_finalized: bool,
}

impl BlockHeader {
    /// A header carrying only a height, for chains whose listener only needs
    /// the tip.
    pub fn at_height(number: u64, is_finalized: bool) -> Self {
        Self {
            number,
            hash: H256::zero(),
            parent_hash: H256::zero(),
            timestamp: 0,
            is_finalized,
        }
    }
}

/// Which header to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRequest {
    /// A specific height
    Number(u64),
    /// The chain tip, which may still reorg
    Latest,
    /// The latest header the chain considers final
    Finalized,
}
