//! This crate contains the infrastructure shared by bridge agents: settings
//! loading, tracing, metrics and their HTTP server, the rocksdb store, the
//! durable task queue, the subgraph client and the agent bootstrap.

// Forbid unsafe code outside of tests
#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(missing_docs)]

pub use agent::*;
pub use metrics::*;
pub use settings::Settings;
pub use subgraph::HttpSubgraphClient;

mod agent;
/// Database for cursors and queued tasks
pub mod db;
mod metrics;
/// Durable delayed task queue
pub mod queue;
/// Metrics HTTP server
pub mod server;
pub mod settings;
mod subgraph;
