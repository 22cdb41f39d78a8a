//! ChanSettle Common Types
//!
//! This crate contains shared types used across the ChanSettle workspace,
//! including channel and account identifiers, the ledger clock, on-ledger
//! channel states, ledger events and the error taxonomy.

pub mod identifiers;
pub mod channel;
pub mod event;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use channel::*;
pub use event::*;
pub use error::*;
pub use time::*;
