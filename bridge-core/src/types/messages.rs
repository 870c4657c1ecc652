// Field names mirror the consensus chain message definitions.
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::{EventId, H160, H256, U256};

/// A message submitted to the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum HeimdallMsg {
    ValidatorJoin {
        from: H160,
        validator_id: u64,
        activation_epoch: u64,
        amount: U256,
        signer_pub_key: Vec<u8>,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    StakeUpdate {
        from: H160,
        validator_id: u64,
        new_amount: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    SignerUpdate {
        from: H160,
        validator_id: u64,
        new_signer_pub_key: Vec<u8>,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    ValidatorExit {
        from: H160,
        validator_id: u64,
        deactivation_epoch: u64,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        nonce: u64,
    },
    TopupFee {
        from: H160,
        user: H160,
        fee: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
    },
    EventRecord {
        from: H160,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
        contract_address: H160,
        data: Vec<u8>,
        id: u64,
        chain_id: String,
    },
    Checkpoint {
        proposer: H160,
        start_block: u64,
        end_block: u64,
        root_hash: H256,
        bor_chain_id: String,
    },
    CheckpointAck {
        from: H160,
        number: u64,
        proposer: H160,
        start_block: u64,
        end_block: u64,
        root_hash: H256,
        tx_hash: H256,
        log_index: u64,
    },
    CheckpointNoAck {
        from: H160,
    },
    Milestone {
        proposer: H160,
        start_block: u64,
        end_block: u64,
        hash: H256,
        bor_chain_id: String,
        milestone_id: String,
    },
    MilestoneTimeout {
        from: H160,
    },
    ProposeSpan {
        span_id: u64,
        proposer: H160,
        start_block: u64,
        end_block: u64,
        bor_chain_id: String,
        seed: H256,
    },
    BackfillSpans {
        from: H160,
        bor_chain_id: String,
        latest_span_id: u64,
        latest_bor_span_id: u64,
    },
}

impl HeimdallMsg {
    /// Type name used in logs and metrics
    pub fn kind(&self) -> &str {
        self.as_ref()
    }

    /// The root chain log this message relays, if it relays one.
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            HeimdallMsg::ValidatorJoin {
                tx_hash, log_index, ..
            }
            | HeimdallMsg::StakeUpdate {
                tx_hash, log_index, ..
            }
            | HeimdallMsg::SignerUpdate {
                tx_hash, log_index, ..
            }
            | HeimdallMsg::ValidatorExit {
                tx_hash, log_index, ..
            }
            | HeimdallMsg::TopupFee {
                tx_hash, log_index, ..
            }
            | HeimdallMsg::EventRecord {
                tx_hash, log_index, ..
            }
            | HeimdallMsg::CheckpointAck {
                tx_hash, log_index, ..
            } => Some(EventId::new(*tx_hash, *log_index)),
            _ => None,
        }
    }
}

/// A call submitted to the root chain contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootChainCall {
    /// Submit a consensus chain checkpoint with the validators' votes
    SubmitCheckpoint {
        vote_sign_bytes: Vec<u8>,
        /// `[r, s, v]` per signer, sorted by signer address
        signatures: Vec<[U256; 3]>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relayed_messages_expose_their_event_id() {
        let msg = HeimdallMsg::EventRecord {
            from: H160::zero(),
            tx_hash: H256::from_low_u64_be(5),
            log_index: 3,
            block_number: 10,
            contract_address: H160::zero(),
            data: vec![],
            id: 1,
            chain_id: "137".to_owned(),
        };
        assert_eq!(
            msg.event_id(),
            Some(EventId::new(H256::from_low_u64_be(5), 3))
        );
        assert_eq!(msg.kind(), "event_record");
        assert_eq!(HeimdallMsg::CheckpointNoAck { from: H160::zero() }.event_id(), None);
    }
}
