//! On-ledger channel states.

use crate::Moment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a channel as recorded on the ledger.
///
/// The ledger is the source of truth. Anything holding a `ChannelState`
/// holds a snapshot that may already be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    /// Channel is open and funded.
    Active,
    /// Settlement was requested; funds may be withdrawn after `deadline`.
    PendingSettlement { deadline: Moment },
    /// Channel is closed and its funds have been paid out.
    Closed,
}

impl ChannelState {
    /// Name of the variant, for logs and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ChannelState::Active => "Active",
            ChannelState::PendingSettlement { .. } => "PendingSettlement",
            ChannelState::Closed => "Closed",
        }
    }

    /// Settlement deadline, if settlement is pending.
    pub fn deadline(&self) -> Option<Moment> {
        match self {
            ChannelState::PendingSettlement { deadline } => Some(*deadline),
            _ => None,
        }
    }

    pub fn is_pending_settlement(&self) -> bool {
        matches!(self, ChannelState::PendingSettlement { .. })
    }

    /// True for states a settler may be constructed for.
    pub fn is_settleable(&self) -> bool {
        matches!(
            self,
            ChannelState::Active | ChannelState::PendingSettlement { .. }
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::PendingSettlement { deadline } => {
                write!(f, "PendingSettlement(deadline={})", deadline)
            }
            other => f.write_str(other.kind_name()),
        }
    }
}
