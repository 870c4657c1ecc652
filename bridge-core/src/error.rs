use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

use crate::{ChainKind, H160};

/// The result of interacting with a chain.
pub type ChainResult<T> = Result<T, ChainCommunicationError>;

/// An error from a chain-access implementation that this crate does not know
/// the concrete type of.
pub trait BridgeCustomError: StdError + Send + Sync + 'static {}

impl<E: StdError + Send + Sync + 'static> BridgeCustomError for E {}

/// Thin wrapper around a boxed [`BridgeCustomError`].
#[repr(transparent)]
pub struct BridgeCustomErrorWrapper(Box<dyn BridgeCustomError>);

impl Debug for BridgeCustomErrorWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for BridgeCustomErrorWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for BridgeCustomErrorWrapper {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// ChainCommunicationError contains errors returned when attempting to
/// query a chain or dispatch a transaction to it
#[derive(Debug, thiserror::Error)]
pub enum ChainCommunicationError {
    /// A request did not complete within its deadline
    #[error("Request to {chain} timed out after {timeout:?}")]
    Timeout {
        /// The chain the request was sent to
        chain: ChainKind,
        /// The deadline that elapsed
        timeout: Duration,
    },
    /// The remote endpoint answered with an error
    #[error("RPC error from {chain}: {message}")]
    Rpc {
        /// The chain the request was sent to
        chain: ChainKind,
        /// The error message returned by the endpoint
        message: String,
    },
    /// A log or response could not be decoded into its typed form
    #[error("Failed to decode {what}: {reason}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// Why decoding failed
        reason: String,
    },
    /// An account expected to exist on the destination chain is missing
    #[error("Account {0:?} not found")]
    AccountNotFound(H160),
    /// A JSON payload could not be (de)serialized
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Any other error; does not implement `From` to prevent
    /// conflicting/absorbing other errors.
    #[error(transparent)]
    Other(BridgeCustomErrorWrapper),
}

impl ChainCommunicationError {
    /// Create a chain communication error from any other existing error
    pub fn from_other<E: BridgeCustomError>(err: E) -> Self {
        Self::Other(BridgeCustomErrorWrapper(Box::new(err)))
    }

    /// Creates a chain communication error of the other error variant from a
    /// string
    pub fn from_other_str(err: impl Into<String>) -> Self {
        #[derive(Debug)]
        #[repr(transparent)]
        struct StringError(String);
        impl Display for StringError {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
        impl StdError for StringError {}

        Self::from_other(StringError(err.into()))
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Rpc { .. } | Self::Other(_))
    }
}
