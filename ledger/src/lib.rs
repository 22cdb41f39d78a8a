//! ChanSettle Ledger Seam
//!
//! The external capabilities the settlement coordinator is built on:
//! point-in-time channel queries, channel-state and clock subscriptions,
//! signed transaction submission, and a publish/subscribe registry for
//! channel events. Also ships `MemoryLedger`, a deterministic in-memory
//! ledger for tests and simulation.

pub mod client;
pub mod subscription;
pub mod registry;
pub mod session;
pub mod memory;

pub use client::{Call, LedgerClient, StateHandler, TickHandler, TxOutcome};
pub use subscription::Subscription;
pub use registry::{EventBus, EventHandler, EventRegistry};
pub use session::{account_of, LedgerSession};
pub use memory::{derive_channel_id, Fault, MemoryLedger, SubmittedTx, SubscriptionCounters};
