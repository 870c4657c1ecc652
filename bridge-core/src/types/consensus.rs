// Field names mirror the consensus chain store.
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{H160, H256, U256};

/// A consensus chain account, used to sign transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Account {
    /// Address of the account
    pub address: H160,
    /// Account number assigned at creation
    pub account_number: u64,
    /// Next expected sequence number
    pub sequence: u64,
}

/// A member of the consensus chain's validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Validator {
    /// Id assigned by the root chain staking contract
    pub id: u64,
    /// Signer address
    pub signer: H160,
    /// Nonce of the last staking event applied for this validator
    pub nonce: u64,
    /// Voting power
    pub voting_power: i64,
}

/// The current validator set, ordered as the consensus chain orders it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ValidatorSet {
    /// Members of the set
    pub validators: Vec<Validator>,
}

impl ValidatorSet {
    /// 1-based rank of the validator signing with `signer`, if it is a member.
    pub fn position_of(&self, signer: &H160) -> Option<u64> {
        self.validators
            .iter()
            .position(|v| &v.signer == signer)
            .map(|i| i as u64 + 1)
    }
}

/// A checkpoint as stored by the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Checkpoint {
    pub proposer: H160,
    pub start_block: u64,
    pub end_block: u64,
    pub root_hash: H256,
    pub bor_chain_id: String,
    /// Unix time the checkpoint entered the buffer
    pub timestamp: u64,
}

/// Parameters of the consensus chain's checkpoint module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct CheckpointParams {
    /// Seconds a buffered checkpoint waits for its acknowledgement
    pub checkpoint_buffer_time: u64,
    pub avg_checkpoint_length: u64,
    pub max_checkpoint_length: u64,
    /// Header block ids on the root chain advance by this interval
    pub child_block_interval: u64,
}

impl CheckpointParams {
    /// [`Self::checkpoint_buffer_time`] as a duration
    pub fn buffer_time(&self) -> Duration {
        Duration::from_secs(self.checkpoint_buffer_time)
    }
}

/// One validator's vote on a checkpoint side-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ValidatorSignature {
    pub signer: H160,
    /// 65 byte `r || s || v` signature
    pub signature: Vec<u8>,
}

impl ValidatorSignature {
    /// Splits the signature into the `[r, s, v]` words the root chain
    /// contract expects. Returns `None` when the signature is not 65 bytes.
    pub fn to_rsv(&self) -> Option<[U256; 3]> {
        if self.signature.len() != 65 {
            return None;
        }
        let r = U256::from_big_endian(&self.signature[0..32]);
        let s = U256::from_big_endian(&self.signature[32..64]);
        let mut v = self.signature[64];
        if v < 27 {
            v += 27;
        }
        Some([r, s, U256::from(v)])
    }
}

/// The votes accumulated for a checkpoint transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct CheckpointSignatures {
    /// The bytes each validator signed
    pub vote_sign_bytes: Vec<u8>,
    pub signatures: Vec<ValidatorSignature>,
}

/// A milestone as stored by the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Milestone {
    pub proposer: H160,
    pub start_block: u64,
    pub end_block: u64,
    pub hash: H256,
    pub bor_chain_id: String,
    pub milestone_id: String,
    pub timestamp: u64,
}

/// A block producer span as stored by the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Span {
    pub id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub bor_chain_id: String,
}

/// Contract addresses and chain ids managed by the consensus chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ChainManagerParams {
    pub bor_chain_id: String,
    pub root_chain_address: H160,
    pub staking_info_address: H160,
    pub state_sender_address: H160,
    pub stake_manager_address: H160,
}

impl ChainManagerParams {
    /// Addresses whose logs the root chain listener scans
    pub fn contract_addresses(&self) -> Vec<H160> {
        vec![
            self.root_chain_address,
            self.staking_info_address,
            self.state_sender_address,
            self.stake_manager_address,
        ]
    }
}

/// A begin/end-block event emitted by the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ConsensusEvent {
    pub height: u64,
    pub tx_hash: H256,
    pub event_type: String,
    pub attributes: BTreeMap<String, String>,
}

impl ConsensusEvent {
    /// Look up an attribute by key
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// The families the consensus chain tracks already-relayed transactions
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventFamily {
    Staking,
    Clerk,
    TopUp,
    Checkpoint,
}

/// Result of submitting a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct TxResponse {
    pub tx_hash: H256,
    /// Chain level response code; zero is the only success value
    pub code: u32,
    pub raw_log: String,
}

impl TxResponse {
    /// The response code meaning the transaction was accepted
    pub const CODE_OK: u32 = 0;

    /// Whether the chain accepted the transaction
    pub fn is_ok(&self) -> bool {
        self.code == Self::CODE_OK
    }
}

/// Header block info stored by the root chain contract for a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct HeaderBlock {
    pub root: H256,
    pub start: u64,
    pub end: u64,
    /// Unix time the header block was created
    pub created_at: u64,
    pub proposer: H160,
}
