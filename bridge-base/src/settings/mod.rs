//! Common settings and configuration for bridge agents
//!
//! Agents read settings from the config files, then from the environment.
//!
//! ### Configuration value precedence
//!
//! Configuration key/value pairs are loaded in the following order, with later
//! sources taking precedence:
//!
//! 1. Every `./config/*.json` file.
//! 2. The files listed in `CONFIG_FILES` (comma separated), with each
//!    sequential one overwriting previous ones as appropriate.
//! 3. Env vars prefixed with `BRIDGE_`. Nested keys are joined with a double
//!    underscore, e.g. `BRIDGE_SELF_HEALING__SUBGRAPH_URL=http://..`
//!    overrides `self_healing.subgraph_url`.
//!
//! All keys are snake_case and all durations are whole seconds.

use std::{path::PathBuf, sync::Arc};

use eyre::{Context, Result};
use serde::Deserialize;

use crate::{
    db::{BridgeRocksDB, DB},
    server::Server,
    CoreMetrics,
};

pub use trace::*;

pub mod loader;
/// Tracing subscriber management
mod trace;

/// Declare that an agent's settings object can be loaded from the config
/// locations.
///
/// E.g.
/// ```ignore
/// impl_loadable_from_settings!("my_agent", MyAgentSettings);
/// ```
#[macro_export]
macro_rules! impl_loadable_from_settings {
    ($agent_name:expr, $settingsobj:ident) => {
        impl bridge_base::LoadableFromSettings for $settingsobj {
            fn load() -> eyre::Result<Self> {
                bridge_base::settings::loader::load_settings_object::<Self>($agent_name)
            }
        }
    };
}

const DEFAULT_METRICS_PORT: u16 = 9090;

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

/// Settings shared by every agent. Usually embedded in an agent's settings
/// object:
///
/// ```ignore
/// #[derive(Debug, Deserialize)]
/// pub struct MySettings {
///     #[serde(flatten)]
///     base: Settings,
///     /* anything */
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Port to listen for prometheus scrape requests
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Path of the rocksdb database holding cursors and queued tasks
    pub db: PathBuf,
    /// The tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,
}

impl Settings {
    /// Create the core metrics from the settings given the name of the agent.
    pub fn metrics(&self, name: &str) -> Result<Arc<CoreMetrics>> {
        Ok(Arc::new(CoreMetrics::new(
            name,
            self.metrics_port,
            prometheus::Registry::new(),
        )?))
    }

    /// Create the server from the settings given the name of the agent.
    pub fn server(&self, core_metrics: Arc<CoreMetrics>) -> Arc<Server> {
        Arc::new(Server::new(self.metrics_port, core_metrics))
    }

    /// Open (or create) the agent database
    pub fn open_db(&self) -> Result<BridgeRocksDB> {
        let db = DB::from_path(&self.db)
            .with_context(|| format!("Opening database at {:?}", self.db))?;
        Ok(BridgeRocksDB::new(db))
    }
}
