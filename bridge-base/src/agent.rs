use std::{fmt::Debug, future::Future, sync::Arc};

use async_trait::async_trait;
use eyre::{Context, Result};
use tracing::{error, info};

use crate::{metrics::CoreMetrics, settings::Settings};

/// Settings of an agent defined from configuration
pub trait LoadableFromSettings: AsRef<Settings> + Sized {
    /// Create a new instance of these settings by reading the configs and env
    /// vars.
    fn load() -> Result<Self>;
}

/// A fundamental agent which does not make any assumptions about the tools
/// which are used.
#[async_trait]
pub trait BaseAgent: Send + Sync + Debug {
    /// The agent's name
    const AGENT_NAME: &'static str;

    /// The settings object for this agent
    type Settings: LoadableFromSettings + Send;

    /// Chain access the agent is built on, supplied by the caller of
    /// [`agent_main`]
    type Clients: Send;

    /// Instantiate the agent from the standard settings object
    async fn from_settings(
        settings: Self::Settings,
        clients: Self::Clients,
        metrics: Arc<CoreMetrics>,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Start running this agent. Resolves once every long-running task has
    /// ended.
    #[allow(clippy::async_yields_async)]
    async fn run(self) -> Result<()>;
}

/// Call this from `main` to fully initialize and run the agent for its entire
/// lifecycle. This assumes only a single agent is being run. This will
/// initialize the metrics server and tracing as well.
///
/// `build_clients` constructs the chain access from the loaded settings.
pub async fn agent_main<A, F, Fut>(build_clients: F) -> Result<()>
where
    A: BaseAgent,
    F: FnOnce(&A::Settings) -> Fut,
    Fut: Future<Output = Result<A::Clients>>,
{
    let settings = A::Settings::load()?;
    let core_settings: &Settings = settings.as_ref();

    let metrics = core_settings.metrics(A::AGENT_NAME)?;
    core_settings.tracing.start_tracing()?;
    let server = core_settings.server(metrics.clone()).run();

    let clients = build_clients(&settings)
        .await
        .context("Building chain clients")?;
    let agent = A::from_settings(settings, clients, metrics).await?;

    let result = tokio::select! {
        res = agent.run() => res,
        res = server => match res {
            Ok(res) => res,
            Err(err) => Err(err).context("Metrics server panicked"),
        },
    };
    if let Err(err) = &result {
        error!(agent = A::AGENT_NAME, ?err, "Agent stopped with an error");
    }
    info!(agent = A::AGENT_NAME, "Shutting down agent...");
    result
}
