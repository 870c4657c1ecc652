use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_base::{
    db::CursorStore,
    queue::{RocksTaskBroker, TaskQueue},
    BaseAgent, CoreMetrics, HttpSubgraphClient,
};
use bridge_core::{
    rpc_clients::WithTimeout, ExecutionChainClient, HeimdallClient, HeimdallTxSubmitter,
    RootChainClient, RootChainTxSubmitter, SubgraphClient,
};
use eyre::{Context, Result};
use futures::future::try_join_all;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    broadcaster::{Broadcaster, HeimdallBroadcaster, RootChainBroadcaster},
    listener::{
        ConsensusChainListener, ExecutionChainListener, Listener, RootChainListener, SelfHealing,
    },
    processor::{
        self, CheckpointProcessor, ClerkProcessor, FeeProcessor, MilestoneProcessor, Processor,
        ProcessorContext, SpanProcessor, StakingProcessor,
    },
    settings::BridgeSettings,
};

/// Chain access the bridge runs on.
#[derive(Debug, Clone)]
pub struct ChainClients {
    /// Root chain reads
    pub root_chain: Arc<dyn RootChainClient>,
    /// Root chain submission, signed by the local validator
    pub root_chain_submitter: Arc<dyn RootChainTxSubmitter>,
    /// Execution chain reads
    pub execution_chain: Arc<dyn ExecutionChainClient>,
    /// Consensus chain reads
    pub heimdall: Arc<dyn HeimdallClient>,
    /// Consensus chain submission, signed by the local validator
    pub heimdall_submitter: Arc<dyn HeimdallTxSubmitter>,
    /// Subgraph override. When unset and self-healing is enabled, the
    /// configured endpoint is queried over HTTP.
    pub subgraph: Option<Arc<dyn SubgraphClient>>,
}

impl ChainClients {
    /// Bound every chain request by `timeout`. The subgraph client carries
    /// its own request timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            root_chain: Arc::new(WithTimeout::new(self.root_chain, timeout)),
            root_chain_submitter: Arc::new(WithTimeout::new(self.root_chain_submitter, timeout)),
            execution_chain: Arc::new(WithTimeout::new(self.execution_chain, timeout)),
            heimdall: Arc::new(WithTimeout::new(self.heimdall, timeout)),
            heimdall_submitter: Arc::new(WithTimeout::new(self.heimdall_submitter, timeout)),
            subgraph: self.subgraph,
        }
    }
}

/// The bridge agent: three listeners feeding a durable task queue, the
/// processors handling its tasks and the self-healing reconciler.
#[derive(Debug)]
pub struct Bridge {
    queue: Arc<TaskQueue>,
    root_chain_listener: Listener<RootChainListener>,
    execution_chain_listener: Listener<ExecutionChainListener>,
    consensus_chain_listener: Listener<ConsensusChainListener>,
    processors: Vec<Arc<dyn Processor>>,
    self_healing: Option<Arc<SelfHealing>>,
}

#[async_trait]
impl BaseAgent for Bridge {
    const AGENT_NAME: &'static str = "bridge";

    type Settings = BridgeSettings;

    type Clients = ChainClients;

    async fn from_settings(
        settings: Self::Settings,
        clients: Self::Clients,
        metrics: Arc<CoreMetrics>,
    ) -> Result<Self>
    where
        Self: Sized,
    {
        let clients = clients.with_timeout(settings.rpc_timeout());
        let db = settings.open_db()?;
        let cursors: Arc<dyn CursorStore> = Arc::new(db.clone());
        let broker = RocksTaskBroker::open(db).context("Reloading persisted tasks")?;
        let queue = Arc::new(TaskQueue::new(
            Arc::new(broker),
            settings.task_queue.clone(),
            &metrics,
        ));

        let broadcaster = Arc::new(Broadcaster {
            heimdall: HeimdallBroadcaster::new(
                clients.heimdall_submitter.clone(),
                clients.heimdall.clone(),
                &metrics,
            )
            .await
            .context("Loading consensus chain account")?,
            root_chain: RootChainBroadcaster::new(clients.root_chain_submitter.clone(), &metrics)
                .await
                .context("Loading root chain nonce")?,
        });
        let ctx = ProcessorContext {
            validator_address: settings.validator_address,
            bor_chain_id: settings.bor_chain_id.clone(),
            heimdall: clients.heimdall.clone(),
            root_chain: clients.root_chain.clone(),
            execution_chain: clients.execution_chain.clone(),
            broadcaster,
            delays: settings.delays.clone(),
        };

        let checkpoint = Arc::new(CheckpointProcessor::new(
            ctx.clone(),
            settings.checkpoint.clone(),
        ));
        let staking = Arc::new(StakingProcessor::new(ctx.clone()));
        let clerk = Arc::new(ClerkProcessor::new(ctx.clone(), settings.max_state_sync_size));
        let fee = Arc::new(FeeProcessor::new(ctx.clone()));
        let milestone = Arc::new(MilestoneProcessor::new(ctx.clone(), settings.milestone.clone()));
        let span = Arc::new(SpanProcessor::new(ctx, settings.span.clone()));
        processor::register(&queue, checkpoint.clone());
        processor::register(&queue, staking.clone());
        processor::register(&queue, clerk.clone());
        processor::register(&queue, fee.clone());
        let processors: Vec<Arc<dyn Processor>> =
            vec![checkpoint, staking, clerk, fee, milestone, span];

        let root_strategy = Arc::new(RootChainListener::new(
            clients.root_chain.clone(),
            clients.heimdall.clone(),
            queue.clone(),
            cursors.clone(),
            settings.validator_address,
            settings.root_chain.clone(),
            settings.delays.clone(),
            &metrics,
        ));
        let execution_strategy = Arc::new(ExecutionChainListener::new(
            clients.execution_chain.clone(),
            queue.clone(),
            settings.checkpoint.retry_count,
        ));
        let consensus_strategy = Arc::new(ConsensusChainListener::new(
            clients.heimdall.clone(),
            queue.clone(),
            cursors,
            settings.checkpoint.retry_count,
            &metrics,
        ));

        let self_healing = match settings.self_healing.active_subgraph_url() {
            Some(url) => {
                let subgraph: Arc<dyn SubgraphClient> = match clients.subgraph {
                    Some(subgraph) => subgraph,
                    None => Arc::new(
                        HttpSubgraphClient::new(
                            url.clone(),
                            settings.self_healing.request_timeout(),
                        )
                        .context("Building subgraph client")?,
                    ),
                };
                Some(Arc::new(SelfHealing::new(
                    root_strategy.clone(),
                    clients.heimdall.clone(),
                    clients.root_chain.clone(),
                    subgraph,
                    settings.self_healing.clone(),
                    &metrics,
                )))
            }
            None => {
                if settings.self_healing.enabled {
                    warn!("Self-healing enabled without a subgraph url, not starting it");
                }
                None
            }
        };

        Ok(Self {
            queue,
            root_chain_listener: Listener::new(root_strategy, settings.root_chain.poll_interval()),
            execution_chain_listener: Listener::new(
                execution_strategy,
                settings.execution_chain.poll_interval(),
            ),
            consensus_chain_listener: Listener::new(
                consensus_strategy,
                settings.consensus_chain.poll_interval(),
            ),
            processors,
            self_healing,
        })
    }

    #[allow(clippy::async_yields_async)]
    async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let tasks = self.spawn_all(shutdown)?;
        info!(tasks = tasks.len(), "Bridge started");

        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "Failed to listen for the interrupt signal");
        }
        info!("Interrupt received, stopping");
        self.stop_listeners();
        shutdown_tx.send_replace(true);

        if let Err(err) = try_join_all(tasks).await {
            error!(?err, "Bridge task panicked");
            return Err(err).context("Bridge task panicked");
        }
        Ok(())
    }
}

impl Bridge {
    fn spawn_all(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = vec![self.queue.clone().run(shutdown.clone())];
        for processor in &self.processors {
            let loops = processor.clone().spawn_loops(shutdown.clone());
            info!(processor = processor.name(), loops = loops.len(), "Started processor");
            tasks.extend(loops);
        }
        tasks.extend(self.root_chain_listener.start()?);
        tasks.extend(self.execution_chain_listener.start()?);
        tasks.extend(self.consensus_chain_listener.start()?);
        if let Some(self_healing) = &self.self_healing {
            tasks.extend(self_healing.clone().spawn(shutdown));
        }
        Ok(tasks)
    }

    fn stop_listeners(&self) {
        self.root_chain_listener.stop();
        self.execution_chain_listener.stop();
        self.consensus_chain_listener.stop();
    }
}
