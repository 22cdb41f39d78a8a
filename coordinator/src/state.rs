//! Settlement phase definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Local view of where a channel is in its settle-then-withdraw lifecycle.
///
/// The ledger stays authoritative for channel state. The phase only records
/// what this settler has done and observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlerPhase {
    /// Settler created, settlement not yet initiated by us.
    #[default]
    Open,
    /// Settlement initiated; waiting for the deadline to pass.
    AwaitingClose,
    /// The ledger clock passed the settlement deadline.
    Closed,
    /// Funds withdrawn. Terminal.
    Withdrawn,
}

impl SettlerPhase {
    /// Check whether moving to `next` is a valid transition.
    pub fn can_transition_to(&self, next: SettlerPhase) -> bool {
        use SettlerPhase::*;
        matches!(
            (self, next),
            (Open, AwaitingClose)
                | (Open, Closed)
                | (AwaitingClose, Closed)
                | (Open, Withdrawn)
                | (AwaitingClose, Withdrawn)
                | (Closed, Withdrawn)
        )
    }

    /// Check if the deadline has been observed to pass.
    pub fn is_closed(&self) -> bool {
        matches!(self, SettlerPhase::Closed | SettlerPhase::Withdrawn)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlerPhase::Withdrawn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlerPhase::Open => "open",
            SettlerPhase::AwaitingClose => "awaiting_close",
            SettlerPhase::Closed => "closed",
            SettlerPhase::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for SettlerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
