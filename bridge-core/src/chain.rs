use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Key of the persisted watermark of the root chain listener.
pub const ROOT_CHAIN_CURSOR_KEY: &str = "rootchain-last-block";
/// Key of the persisted watermark of the consensus chain listener.
pub const CONSENSUS_CHAIN_CURSOR_KEY: &str = "heimdall-last-block";

/// The chains the bridge relays between.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChainKind {
    /// The L1 chain holding the staking and checkpoint contracts
    RootChain,
    /// The L2 chain producing blocks
    ExecutionChain,
    /// The validator consensus chain
    ConsensusChain,
}

impl ChainKind {
    /// The key under which this chain's listener persists its cursor, if it
    /// keeps one.
    pub fn cursor_key(&self) -> Option<&'static str> {
        match self {
            ChainKind::RootChain => Some(ROOT_CHAIN_CURSOR_KEY),
            ChainKind::ConsensusChain => Some(CONSENSUS_CHAIN_CURSOR_KEY),
            ChainKind::ExecutionChain => None,
        }
    }
}
