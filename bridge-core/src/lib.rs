//! This crate contains core primitives, traits, and types for the bridge
//! relay: the chains it watches, the events and messages it moves between
//! them, and the chain-access capabilities it consumes.

// Forbid unsafe code outside of tests
#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(missing_docs)]

pub use chain::*;
pub use error::*;
pub use primitive_types::{H160, H256, U256};
pub use traits::*;
pub use types::*;

mod chain;
mod error;
/// Helpers for calling chain-access capabilities
pub mod rpc_clients;
mod traits;
mod types;
