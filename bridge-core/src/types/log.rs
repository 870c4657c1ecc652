use std::fmt::{Display, Formatter};

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::{H160, H256};

/// The idempotency key of every relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, new)]
pub struct EventId {
    /// Hash of the transaction that emitted the event
    pub tx_hash: H256,
    /// Index of the log within its block
    pub log_index: u64,
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.tx_hash, self.log_index)
    }
}

/// Where a log was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct LogMeta {
    /// Address of the emitting contract
    pub address: H160,
    /// Block the log was included in
    pub block_number: u64,
    /// Hash of the emitting transaction
    pub tx_hash: H256,
    /// Index of the log within its block
    pub log_index: u64,
}

impl LogMeta {
    /// The idempotency key of this log
    pub fn event_id(&self) -> EventId {
        EventId::new(self.tx_hash, self.log_index)
    }
}

/// An undecoded contract log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct RawLog {
    /// Indexed topics; the first is the event signature
    pub topics: Vec<H256>,
    /// Non-indexed ABI-encoded data
    pub data: Vec<u8>,
    /// Where the log was emitted
    pub meta: LogMeta,
}

impl RawLog {
    /// The event signature topic, if any
    pub fn topic0(&self) -> Option<&H256> {
        self.topics.first()
    }
}

/// A decoded event together with the log it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Logged<T> {
    /// The decoded event
    pub event: T,
    /// Where it was emitted
    pub meta: LogMeta,
}

impl<T> Logged<T> {
    /// The idempotency key of the underlying log
    pub fn event_id(&self) -> EventId {
        self.meta.event_id()
    }
}
