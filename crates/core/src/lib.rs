//! Client core for CeloFlow salary streams.
//!
//! The streaming contract owns every state change. This crate reads contract
//! state over JSON-RPC, derives live balances from it, and submits the three
//! mutating calls (create, withdraw, cancel) through a signer endpoint.
//!
//! Layering, leaves first:
//!
//! - [`stream::accrual`]: the linear vesting formula.
//! - [`stream::aggregate`]: dashboard totals and stream filtering.
//! - [`poller`]: periodic refresh driven by the wallet [`session`].
//! - [`dispatcher`]: validated action submission with per-stream pending state.
//! - [`chain`]: the contract capability interface and its implementations.

pub mod abi;
pub mod address;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod poller;
pub mod session;
pub mod stream;
pub mod time_source;
pub mod units;

pub use address::Address;
pub use chain::{ChainError, StreamContract, TxHash, WalletSession};
pub use config::{ClientConfig, ConfigError};
pub use dispatcher::{ActionDispatcher, ActionError};
pub use poller::{Poller, PollerHandle, PollerState};
pub use session::{Session, SessionStatus};
pub use stream::{DashboardSnapshot, Stream, StreamId, StreamView};
