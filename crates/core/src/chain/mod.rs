//! Access to the streaming contract and the wallet behind it.
//!
//! ## Architecture
//!
//! Two capability traits sit between the client logic and the chain:
//!
//! - [`StreamContract`]: reads contract state, submits the three mutating
//!   calls, and waits for confirmation.
//! - [`WalletSession`]: what the signer reports about itself (accounts,
//!   network, balance).
//!
//! [`rpc::RpcClient`] implements both against a JSON-RPC endpoint.
//! [`memory::InMemoryStreamContract`] implements both in memory with the
//! contract's rules, for tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::abi::{self, AbiError};
use crate::address::Address;
use crate::stream::{Stream, StreamId};

#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod rpc;

/// Boxed future returned by the capability traits.
pub type ChainFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChainError>> + Send + 'a>>;

// =============================================================================
// Transaction reference
// =============================================================================

/// 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl FromStr for TxHash {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = abi::parse_hex_data(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Decode(format!("transaction hash must be 32 bytes: {s}")))?;
        Ok(Self(arr))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures talking to the chain or the signer.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    /// An error object returned by the node or the signer.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("timed out waiting for confirmation of {0}")]
    ConfirmationTimeout(TxHash),
    #[error("stream {0} does not exist")]
    UnknownStream(StreamId),
    #[error("no account available from the signer")]
    NoAccount,
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<AbiError> for ChainError {
    fn from(e: AbiError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// =============================================================================
// Calls
// =============================================================================

/// A state-changing contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractCall {
    /// Payable: the stream's total amount is the attached value.
    CreateStream {
        employee: Address,
        duration_secs: u64,
        value: u128,
    },
    Withdraw(StreamId),
    CancelStream(StreamId),
}

impl ContractCall {
    pub fn calldata(&self) -> Vec<u8> {
        match self {
            Self::CreateStream {
                employee,
                duration_secs,
                ..
            } => abi::encode_create_stream(employee, *duration_secs),
            Self::Withdraw(id) => abi::encode_withdraw(*id),
            Self::CancelStream(id) => abi::encode_cancel_stream(*id),
        }
    }

    /// Native value attached to the transaction.
    pub fn value(&self) -> u128 {
        match self {
            Self::CreateStream { value, .. } => *value,
            Self::Withdraw(_) | Self::CancelStream(_) => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateStream { .. } => "createStream",
            Self::Withdraw(_) => "withdraw",
            Self::CancelStream(_) => "cancelStream",
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// The streaming contract.
pub trait StreamContract: Send + Sync + 'static {
    /// Number of streams ever created; ids are `0..next_stream_id`.
    fn next_stream_id(&self) -> ChainFuture<'_, StreamId>;

    /// The stored record of stream `id`.
    fn stream(&self, id: StreamId) -> ChainFuture<'_, Stream>;

    /// The contract's own view of what stream `id` can withdraw now.
    fn available(&self, id: StreamId) -> ChainFuture<'_, u128>;

    /// Sign and send `call` from `from`. Resolves once the signer has
    /// accepted it; the transaction may still be pending.
    fn submit(&self, from: Address, call: ContractCall) -> ChainFuture<'_, TxHash>;

    /// Resolve once `tx` is mined successfully.
    fn wait_for_confirmation(&self, tx: TxHash) -> ChainFuture<'_, ()>;
}

/// What the wallet reports about itself.
pub trait WalletSession: Send + Sync + 'static {
    /// Accounts the signer can sign for, preferred first.
    fn accounts(&self) -> ChainFuture<'_, Vec<Address>>;

    fn chain_id(&self) -> ChainFuture<'_, u64>;

    /// Native balance in wei.
    fn balance(&self, account: Address) -> ChainFuture<'_, u128>;
}
