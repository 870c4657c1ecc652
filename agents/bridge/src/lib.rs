//! The bridge agent relays events between the root chain, the execution
//! chain and the consensus chain. Listeners turn new blocks into durable
//! tasks, processors turn tasks into destination chain messages and the
//! broadcaster submits them in sequence order.

// Forbid unsafe code outside of tests
#![cfg_attr(not(test), forbid(unsafe_code))]

mod bridge;
pub mod broadcaster;
pub mod listener;
pub mod processor;
pub mod settings;

#[cfg(test)]
mod test_utils;

pub use bridge::*;
