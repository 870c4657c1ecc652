//! Chain listeners.
//!
//! A [`Listener`] owns the loops every watched chain shares: a poll loop
//! fetching headers on an interval and a processing loop draining them into
//! the chain's [`ListenerStrategy`]. The strategy decides what a header means
//! for its chain.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::{
    rpc_clients::call_with_timeout, BlockHeader, BlockRequest, ChainKind, ChainResult,
};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, info_span, warn, Instrument};

pub use consensus_chain::ConsensusChainListener;
pub use execution_chain::ExecutionChainListener;
pub use root_chain::RootChainListener;
pub use self_healing::SelfHealing;

mod consensus_chain;
mod execution_chain;
mod root_chain;
mod self_healing;

/// Headers buffered between the poll loop and the processing loop
pub const HEADER_CHANNEL_CAPACITY: usize = 16;
const HEADER_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What a listener does with the headers of its chain.
#[async_trait]
pub trait ListenerStrategy: Send + Sync + Debug + 'static {
    /// The chain listened to
    fn chain(&self) -> ChainKind;

    /// Which header the poll loop asks for
    fn header_request(&self) -> BlockRequest {
        BlockRequest::Latest
    }

    /// Fetch a header from the chain
    async fn fetch_header(&self, request: BlockRequest) -> ChainResult<BlockHeader>;

    /// Act on a polled header. An error leaves the chain's cursor where it
    /// was, so the same range is evaluated again on the next header.
    async fn process_header(&self, header: BlockHeader) -> eyre::Result<()>;
}

/// Errors of the listener lifecycle
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ListenerError {
    /// `start` was called on a running listener
    #[error("Listener for {0} already started")]
    AlreadyStarted(ChainKind),
    /// `start` was called on a stopped listener
    #[error("Listener for {0} is stopped")]
    Stopped(ChainKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Created,
    Started,
    Stopped,
}

/// Runs a [`ListenerStrategy`] through `Created -> Started -> Stopped`.
#[derive(Debug)]
pub struct Listener<S> {
    strategy: Arc<S>,
    poll_interval: Duration,
    state: Mutex<ListenerState>,
    shutdown: watch::Sender<bool>,
}

impl<S: ListenerStrategy> Listener<S> {
    /// Wrap `strategy`, polling every `poll_interval`
    pub fn new(strategy: Arc<S>, poll_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            strategy,
            poll_interval,
            state: Mutex::new(ListenerState::Created),
            shutdown,
        }
    }

    /// The wrapped strategy
    pub fn strategy(&self) -> &Arc<S> {
        &self.strategy
    }

    /// Spawn the poll loop and the processing loop.
    pub fn start(&self) -> Result<Vec<JoinHandle<()>>, ListenerError> {
        let chain = self.strategy.chain();
        {
            let mut state = self.state.lock();
            match *state {
                ListenerState::Created => *state = ListenerState::Started,
                ListenerState::Started => return Err(ListenerError::AlreadyStarted(chain)),
                ListenerState::Stopped => return Err(ListenerError::Stopped(chain)),
            }
        }
        info!(%chain, poll_interval = ?self.poll_interval, "Starting listener");

        let (header_tx, header_rx) = mpsc::channel(HEADER_CHANNEL_CAPACITY);
        let poll = tokio::spawn(
            poll_loop(
                self.strategy.clone(),
                self.poll_interval,
                header_tx,
                self.shutdown.subscribe(),
            )
            .instrument(info_span!("ListenerPoll", %chain)),
        );
        let process = tokio::spawn(
            process_loop(self.strategy.clone(), header_rx, self.shutdown.subscribe())
                .instrument(info_span!("ListenerProcess", %chain)),
        );
        Ok(vec![poll, process])
    }

    /// Signal both loops to exit. Calling this more than once is a no-op.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == ListenerState::Stopped {
            return;
        }
        *state = ListenerState::Stopped;
        self.shutdown.send_replace(true);
        info!(chain = %self.strategy.chain(), "Stopping listener");
    }
}

/// Fetch the header the strategy asks for. A failed finalized fetch falls
/// back to the latest header, marked as not finalized.
pub(crate) async fn poll_header<S: ListenerStrategy + ?Sized>(
    strategy: &S,
) -> ChainResult<BlockHeader> {
    let chain = strategy.chain();
    let request = strategy.header_request();
    match call_with_timeout(chain, HEADER_FETCH_TIMEOUT, strategy.fetch_header(request)).await {
        Ok(header) => Ok(header),
        Err(err) if request == BlockRequest::Finalized => {
            debug!(?err, "Finalized header unavailable, falling back to latest");
            let mut header = call_with_timeout(
                chain,
                HEADER_FETCH_TIMEOUT,
                strategy.fetch_header(BlockRequest::Latest),
            )
            .await?;
            header.is_finalized = false;
            Ok(header)
        }
        Err(err) => Err(err),
    }
}

async fn poll_loop<S: ListenerStrategy>(
    strategy: Arc<S>,
    poll_interval: Duration,
    headers: mpsc::Sender<BlockHeader>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let header = match poll_header(strategy.as_ref()).await {
            Ok(header) => header,
            Err(err) => {
                warn!(?err, "Failed to fetch header");
                continue;
            }
        };
        match headers.try_send(header) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(header)) => {
                debug!(number = header.number, "Header channel full, dropping header");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    debug!("Poll loop exited");
}

async fn process_loop<S: ListenerStrategy>(
    strategy: Arc<S>,
    mut headers: mpsc::Receiver<BlockHeader>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let header = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            header = headers.recv() => match header {
                Some(header) => header,
                None => break,
            },
        };
        if let Err(err) = strategy.process_header(header).await {
            warn!(number = header.number, ?err, "Failed to process header");
        }
    }
    debug!("Processing loop exited");
}

/// The inclusive block range a header makes actionable, given the last block
/// already dispatched. `None` when there is nothing to do yet.
pub fn block_range(
    header: &BlockHeader,
    required_confirmations: u64,
    cursor: Option<u64>,
) -> Option<(u64, u64)> {
    let to = if header.is_finalized {
        header.number
    } else if header.number > required_confirmations {
        header.number - required_confirmations
    } else {
        return None;
    };

    let from = match cursor {
        Some(cursor) if cursor >= to => return None,
        Some(cursor) => cursor + 1,
        None => to,
    };
    Some((from.min(to), to))
}

/// Submission delay of the validator ranked `position` in the set: later
/// ranks wait longer, and everyone waits longer while the destination
/// mempool is busy.
pub fn calculate_task_delay(position: u64, base: Duration, mempool_count: u64) -> Duration {
    let congestion = 1.0 + mempool_count as f64 / 1000.0;
    base.mul_f64(position as f64 * congestion)
}
