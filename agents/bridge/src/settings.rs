//! Bridge agent configuration
//!
//! Every duration is configured in whole seconds and read through an accessor
//! returning a [`Duration`].

use std::time::Duration;

use bridge_base::{impl_loadable_from_settings, queue::TaskQueueConf, Settings};
use bridge_core::{rpc_clients::DEFAULT_REQUEST_TIMEOUT, H160};
use derive_more::{AsRef, Deref};
use serde::Deserialize;
use url::Url;

/// Settings for `Bridge`
#[derive(Debug, Deserialize, AsRef, Deref)]
pub struct BridgeSettings {
    #[as_ref]
    #[deref]
    #[serde(flatten)]
    pub base: Settings,

    /// Signer address of the local validator
    pub validator_address: H160,
    /// Chain id of the execution chain, as known by the consensus chain
    pub bor_chain_id: String,

    /// Root chain listener
    #[serde(default)]
    pub root_chain: ListenerConf,
    /// Execution chain listener
    #[serde(default)]
    pub execution_chain: ListenerConf,
    /// Consensus chain listener
    #[serde(default)]
    pub consensus_chain: ListenerConf,

    /// Task queue worker pool
    #[serde(default)]
    pub task_queue: TaskQueueConf,
    /// Submission and retry delays
    #[serde(default)]
    pub delays: DelayConf,
    /// Checkpoint proposals
    #[serde(default)]
    pub checkpoint: CheckpointConf,
    /// Milestone proposals
    #[serde(default)]
    pub milestone: MilestoneConf,
    /// Span proposals
    #[serde(default)]
    pub span: SpanConf,
    /// Reconciliation against the subgraph
    #[serde(default)]
    pub self_healing: SelfHealingConf,

    /// State sync payloads larger than this many bytes are relayed empty
    #[serde(default = "default_max_state_sync_size")]
    pub max_state_sync_size: usize,

    /// Seconds a single chain request may take. Applies to every read and
    /// submission made through the chain clients.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,
}

impl_loadable_from_settings!("bridge", BridgeSettings);

fn default_max_state_sync_size() -> usize {
    30_000
}

fn default_rpc_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl BridgeSettings {
    /// Deadline of a single chain request
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout.max(1))
    }
}

/// Polling of a single chain
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConf {
    /// Seconds between header polls
    pub poll_interval: u64,
    /// Blocks a non-finalized header must be buried under before its logs
    /// are acted on
    pub required_confirmations: u64,
}

impl Default for ListenerConf {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            required_confirmations: 0,
        }
    }
}

impl ListenerConf {
    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

/// Submission delays
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelayConf {
    /// Delay added per rank of a backstop validator
    pub task_delay_between_each_val: u64,
    /// Base delay of an out of order staking event, scaled by the nonce gap
    pub retry_task_delay: u64,
    /// Delay of a state sync already waiting in the mempool
    pub retry_state_sync_task_delay: u64,
    /// Delay of a validator join whose account does not exist yet
    pub validator_join_retry_delay: u64,
}

impl Default for DelayConf {
    fn default() -> Self {
        Self {
            task_delay_between_each_val: 24,
            retry_task_delay: 12,
            retry_state_sync_task_delay: 24,
            validator_join_retry_delay: 60,
        }
    }
}

impl DelayConf {
    /// Delay added per rank of a backstop validator
    pub fn task_delay_between_each_val(&self) -> Duration {
        Duration::from_secs(self.task_delay_between_each_val)
    }

    /// Base delay of an out of order staking event
    pub fn retry_task_delay(&self) -> Duration {
        Duration::from_secs(self.retry_task_delay)
    }

    /// Delay of a state sync already waiting in the mempool
    pub fn retry_state_sync_task_delay(&self) -> Duration {
        Duration::from_secs(self.retry_state_sync_task_delay)
    }

    /// Delay of a validator join whose account does not exist yet
    pub fn validator_join_retry_delay(&self) -> Duration {
        Duration::from_secs(self.validator_join_retry_delay)
    }
}

/// Checkpoint proposals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConf {
    /// Fewest execution chain blocks a checkpoint may cover
    pub min_length: u64,
    /// Most execution chain blocks a checkpoint may cover
    pub max_length: u64,
    /// Seconds between no-ack checks
    pub no_ack_poll_interval: u64,
    /// Retry budget of checkpoint tasks
    pub retry_count: u32,
}

impl Default for CheckpointConf {
    fn default() -> Self {
        Self {
            min_length: 256,
            max_length: 1024,
            no_ack_poll_interval: 1010,
            retry_count: 20,
        }
    }
}

impl CheckpointConf {
    /// Interval of the no-ack loop
    pub fn no_ack_poll_interval(&self) -> Duration {
        Duration::from_secs(self.no_ack_poll_interval)
    }
}

/// Milestone proposals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MilestoneConf {
    /// Seconds between proposal attempts
    pub poll_interval: u64,
    /// Execution chain blocks covered by a milestone
    pub length: u64,
    /// Blocks the end of a milestone must be buried under
    pub confirmations: u64,
    /// Seconds between timeout checks
    pub timeout_poll_interval: u64,
    /// Blocks the execution chain may run past the last milestone before a
    /// timeout is proposed
    pub timeout_blocks: u64,
    /// Seconds that must pass between two timeouts
    pub timeout_buffer_time: u64,
    /// Upcoming proposers allowed to propose a timeout
    pub proposer_lookahead: u64,
}

impl Default for MilestoneConf {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            length: 12,
            confirmations: 16,
            timeout_poll_interval: 60,
            timeout_blocks: 256,
            timeout_buffer_time: 256,
            proposer_lookahead: 10,
        }
    }
}

impl MilestoneConf {
    /// Interval of the proposal loop
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Interval of the timeout loop
    pub fn timeout_poll_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_poll_interval)
    }
}

/// Span proposals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpanConf {
    /// Seconds between span checks
    pub poll_interval: u64,
    /// Execution chain blocks covered by a span
    pub duration: u64,
}

impl Default for SpanConf {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            duration: 6400,
        }
    }
}

impl SpanConf {
    /// Interval of the span loop
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

/// Reconciliation against the subgraph indexing the root chain
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelfHealingConf {
    /// Whether the reconciler runs at all
    pub enabled: bool,
    /// GraphQL endpoint of the subgraph
    pub subgraph_url: Option<Url>,
    /// Seconds between stake reconciliations
    pub stake_interval: u64,
    /// Seconds between state sync reconciliations
    pub state_sync_interval: u64,
    /// Events younger than this many seconds are left to the listener
    pub max_depth_duration: u64,
    /// Times a replayed state sync is looked up before giving up until the
    /// next tick
    pub state_sync_poll_attempts: u32,
    /// Seconds before a subgraph request times out
    pub request_timeout: u64,
}

impl Default for SelfHealingConf {
    fn default() -> Self {
        Self {
            enabled: false,
            subgraph_url: None,
            stake_interval: 3600,
            state_sync_interval: 600,
            max_depth_duration: 3600,
            state_sync_poll_attempts: 30,
            request_timeout: 10,
        }
    }
}

impl SelfHealingConf {
    /// The subgraph endpoint, when reconciliation is switched on
    pub fn active_subgraph_url(&self) -> Option<&Url> {
        self.subgraph_url.as_ref().filter(|_| self.enabled)
    }

    /// Interval of the stake ticker
    pub fn stake_interval(&self) -> Duration {
        Duration::from_secs(self.stake_interval)
    }

    /// Interval of the state sync ticker
    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_secs(self.state_sync_interval)
    }

    /// Minimum age of a replayed event
    pub fn max_depth_duration(&self) -> Duration {
        Duration::from_secs(self.max_depth_duration)
    }

    /// Subgraph request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
