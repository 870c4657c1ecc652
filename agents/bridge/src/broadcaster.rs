//! Sequence-aware submission to the consensus chain and the root chain.
//!
//! Each destination owns its own lock, so a slow root chain submission never
//! holds up a consensus chain broadcast.

use std::fmt::Debug;
use std::sync::Arc;

use bridge_base::CoreMetrics;
use bridge_core::{
    ChainKind, ChainResult, HeimdallClient, HeimdallMsg, HeimdallTxSubmitter, RootChainCall,
    RootChainTxSubmitter, TxResponse,
};
use prometheus::IntCounterVec;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Account number and next sequence of the local consensus chain account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountSequenceState {
    /// Account number
    pub account_number: u64,
    /// Sequence the next transaction is signed with
    pub last_seq_no: u64,
}

fn outcome(result: &ChainResult<TxResponse>) -> &'static str {
    match result {
        Ok(response) if response.is_ok() => "ok",
        Ok(_) => "rejected",
        Err(_) => "error",
    }
}

/// Broadcasts messages to the consensus chain.
#[derive(Debug)]
pub struct HeimdallBroadcaster {
    submitter: Arc<dyn HeimdallTxSubmitter>,
    client: Arc<dyn HeimdallClient>,
    state: Mutex<AccountSequenceState>,
    broadcast_total: IntCounterVec,
}

impl HeimdallBroadcaster {
    /// Create a broadcaster, loading the account sequence from the chain.
    pub async fn new(
        submitter: Arc<dyn HeimdallTxSubmitter>,
        client: Arc<dyn HeimdallClient>,
        metrics: &CoreMetrics,
    ) -> ChainResult<Self> {
        let address = submitter.address();
        let state = match client.account(address).await? {
            Some(account) => AccountSequenceState {
                account_number: account.account_number,
                last_seq_no: account.sequence,
            },
            None => {
                warn!(?address, "Consensus chain account not found, starting at sequence 0");
                AccountSequenceState::default()
            }
        };
        info!(?address, ?state, "Loaded consensus chain account");
        Ok(Self::with_state(submitter, client, state, metrics))
    }

    /// Create a broadcaster starting from a known account state
    pub fn with_state(
        submitter: Arc<dyn HeimdallTxSubmitter>,
        client: Arc<dyn HeimdallClient>,
        state: AccountSequenceState,
        metrics: &CoreMetrics,
    ) -> Self {
        Self {
            submitter,
            client,
            state: Mutex::new(state),
            broadcast_total: metrics.broadcast_total(),
        }
    }

    /// The cached account state
    pub async fn sequence_state(&self) -> AccountSequenceState {
        *self.state.lock().await
    }

    /// Sign and submit `msg`. The sequence only advances on an OK response;
    /// any other result resynchronizes it with the chain.
    #[instrument(skip_all, fields(msg = msg.kind()))]
    pub async fn broadcast(&self, msg: &HeimdallMsg) -> ChainResult<TxResponse> {
        let mut state = self.state.lock().await;
        let result = self
            .submitter
            .sign_and_broadcast(msg, state.account_number, state.last_seq_no)
            .await;
        self.broadcast_total
            .with_label_values(&[ChainKind::ConsensusChain.as_ref(), outcome(&result)])
            .inc();

        match &result {
            Ok(response) if response.is_ok() => {
                state.last_seq_no += 1;
                debug!(tx_hash = ?response.tx_hash, sequence = state.last_seq_no, "Broadcast ok");
            }
            Ok(response) => {
                warn!(
                    tx_hash = ?response.tx_hash,
                    code = response.code,
                    raw_log = %response.raw_log,
                    "Broadcast rejected"
                );
                self.refresh(&mut state).await;
            }
            Err(err) => {
                warn!(?err, "Broadcast failed");
                self.refresh(&mut state).await;
            }
        }
        result
    }

    async fn refresh(&self, state: &mut AccountSequenceState) {
        let address = self.submitter.address();
        match self.client.account(address).await {
            Ok(Some(account)) => {
                state.account_number = account.account_number;
                state.last_seq_no = account.sequence;
                debug!(?state, "Refreshed account sequence");
            }
            Ok(None) => warn!(?address, "Consensus chain account not found on refresh"),
            Err(err) => warn!(?err, "Failed to refresh account sequence"),
        }
    }
}

/// Submits calls to the root chain contracts.
#[derive(Debug)]
pub struct RootChainBroadcaster {
    submitter: Arc<dyn RootChainTxSubmitter>,
    nonce: Mutex<u64>,
    broadcast_total: IntCounterVec,
}

impl RootChainBroadcaster {
    /// Create a broadcaster, loading the pending nonce from the chain.
    pub async fn new(
        submitter: Arc<dyn RootChainTxSubmitter>,
        metrics: &CoreMetrics,
    ) -> ChainResult<Self> {
        let nonce = submitter.pending_nonce().await?;
        info!(address = ?submitter.address(), nonce, "Loaded root chain nonce");
        Ok(Self::with_nonce(submitter, nonce, metrics))
    }

    /// Create a broadcaster starting from a known nonce
    pub fn with_nonce(
        submitter: Arc<dyn RootChainTxSubmitter>,
        nonce: u64,
        metrics: &CoreMetrics,
    ) -> Self {
        Self {
            submitter,
            nonce: Mutex::new(nonce),
            broadcast_total: metrics.broadcast_total(),
        }
    }

    /// The cached nonce
    pub async fn nonce(&self) -> u64 {
        *self.nonce.lock().await
    }

    /// Submit `call`, with the same nonce policy as the consensus chain
    /// sequence.
    #[instrument(skip_all)]
    pub async fn broadcast(&self, call: &RootChainCall) -> ChainResult<TxResponse> {
        let mut nonce = self.nonce.lock().await;
        let result = self.submitter.send(call, *nonce).await;
        self.broadcast_total
            .with_label_values(&[ChainKind::RootChain.as_ref(), outcome(&result)])
            .inc();

        match &result {
            Ok(response) if response.is_ok() => {
                *nonce += 1;
                debug!(tx_hash = ?response.tx_hash, nonce = *nonce, "Root chain submission ok");
            }
            _ => {
                warn!(?result, "Root chain submission failed");
                match self.submitter.pending_nonce().await {
                    Ok(pending) => *nonce = pending,
                    Err(err) => warn!(?err, "Failed to refresh root chain nonce"),
                }
            }
        }
        result
    }
}

/// The two destination broadcasters.
#[derive(Debug)]
pub struct Broadcaster {
    /// Consensus chain
    pub heimdall: HeimdallBroadcaster,
    /// Root chain
    pub root_chain: RootChainBroadcaster,
}
