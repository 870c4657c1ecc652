// Field names mirror the contract ABI.
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::{H160, H256, U256};

/// A validator staked and asked to join the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedEvent {
    pub validator_id: u64,
    pub signer: H160,
    pub signer_pub_key: Vec<u8>,
    pub nonce: u64,
    pub activation_epoch: u64,
    pub amount: U256,
}

/// A validator's stake changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeUpdateEvent {
    pub validator_id: u64,
    pub nonce: u64,
    pub new_amount: U256,
}

/// A validator rotated its signer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerChangeEvent {
    pub validator_id: u64,
    pub nonce: u64,
    pub old_signer: H160,
    pub new_signer: H160,
    pub signer_pub_key: Vec<u8>,
}

/// A validator started unbonding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeInitEvent {
    pub validator_id: u64,
    pub user: H160,
    pub nonce: u64,
    pub deactivation_epoch: u64,
    pub amount: U256,
}

/// A state sync was requested from the root chain to the execution chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSyncedEvent {
    pub id: u64,
    pub contract_address: H160,
    pub data: Vec<u8>,
}

/// Fee was topped up for a consensus chain account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpFeeEvent {
    pub user: H160,
    pub fee: U256,
}

/// A checkpoint was accepted by the root chain contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHeaderBlockEvent {
    pub proposer: H160,
    pub header_block_id: u64,
    pub reward: U256,
    pub start: u64,
    pub end: u64,
    pub root: H256,
}

/// Root chain events the bridge relays, decoded from contract logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "PascalCase")]
pub enum RootChainEvent {
    /// See [`StakedEvent`]
    Staked(StakedEvent),
    /// See [`StakeUpdateEvent`]
    StakeUpdate(StakeUpdateEvent),
    /// See [`SignerChangeEvent`]
    SignerChange(SignerChangeEvent),
    /// See [`UnstakeInitEvent`]
    UnstakeInit(UnstakeInitEvent),
    /// See [`StateSyncedEvent`]
    StateSynced(StateSyncedEvent),
    /// See [`TopUpFeeEvent`]
    TopUpFee(TopUpFeeEvent),
    /// See [`NewHeaderBlockEvent`]
    NewHeaderBlock(NewHeaderBlockEvent),
}

impl RootChainEvent {
    /// Name of the event as emitted by the contract
    pub fn name(&self) -> &str {
        self.as_ref()
    }
}
