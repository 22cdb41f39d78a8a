//! ChanSettle Coordinator
//!
//! Coordinates the settlement of one bilateral payment channel recorded on
//! an external ledger. The settler initiates settlement, tracks a deadline
//! the counterparty may push back, and notifies any number of waiters
//! exactly once when the deadline has passed and funds can be withdrawn.
//!
//! Waiters are driven entirely by the ledger clock subscription: if that
//! subscription stops delivering ticks, registered waiters stay pending.

pub mod settler;
pub mod config;
pub mod deadline;
pub mod poller;
pub mod waiters;
pub mod state;
pub mod metrics;
pub mod error;

pub use settler::{ChannelSettler, InitOutcome};
pub use config::{SettlerConfig, WithdrawPolicy};
pub use deadline::DeadlineTracker;
pub use poller::{TimeoutPoller, Waiter};
pub use waiters::{WaiterId, WaiterQueue};
pub use state::SettlerPhase;
pub use metrics::{MetricsSnapshot, SettlerMetrics};
pub use error::{Result, SettleError};
