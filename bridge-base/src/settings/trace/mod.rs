use eyre::{Context, Result};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    prelude::*,
};

pub use self::fmt::Style;

/// Configure a `tracing_subscriber::fmt` Layer outputting to stdout
mod fmt;

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 4,
    /// Trace
    Trace = 5,
    /// Info
    #[serde(other)]
    #[default]
    Info = 3,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Configuration for the tracing subscribers used by bridge agents
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub(crate) fmt: Style,
    #[serde(default)]
    pub(crate) level: Level,
}

/// Dependencies whose debug output is only wanted at trace level
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "rocksdb", "axum"];

impl TracingConfig {
    /// Install the global subscriber: the configured stdout format, filtered
    /// by level, plus span traces for `eyre` reports.
    pub fn start_tracing(&self) -> Result<()> {
        tracing_subscriber::Registry::default()
            .with(self.fmt.layer().with_filter(self.targets()))
            .with(tracing_error::ErrorLayer::default())
            .try_init()
            .context("Installing the tracing subscriber")
    }

    fn targets(&self) -> Targets {
        let targets = Targets::new().with_default(self.level);
        if self.level >= Level::Trace {
            return targets;
        }
        NOISY_TARGETS
            .iter()
            .fold(targets, |targets, target| targets.with_target(*target, Level::Info))
    }
}
