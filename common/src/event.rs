//! Ledger events and the keys they are published under.

use crate::{ChannelId, Moment};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of channel event emitted by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A party requested settlement of the channel.
    InitiatedSettlement,
    /// The counterparty extended the settlement deadline.
    PushedBackSettlement,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::InitiatedSettlement => "InitiatedSettlement",
            EventKind::PushedBackSettlement => "PushedBackSettlement",
        }
    }
}

/// Key under which an event is published in an event registry.
///
/// Derived deterministically from the event kind and the channel, so any
/// party can compute the key for "settlement pushed back on channel X".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub kind: EventKind,
    pub channel_id: ChannelId,
}

impl EventId {
    pub fn new(kind: EventKind, channel_id: ChannelId) -> Self {
        Self { kind, channel_id }
    }

    pub fn initiated_settlement(channel_id: ChannelId) -> Self {
        Self::new(EventKind::InitiatedSettlement, channel_id)
    }

    pub fn pushed_back_settlement(channel_id: ChannelId) -> Self {
        Self::new(EventKind::PushedBackSettlement, channel_id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.name(), self.channel_id)
    }
}

/// An event observed on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEvent {
    /// Settlement started; funds are locked until `deadline`.
    InitiatedSettlement {
        channel_id: ChannelId,
        deadline: Moment,
    },
    /// Settlement deadline moved to `deadline`.
    PushedBackSettlement {
        channel_id: ChannelId,
        deadline: Moment,
    },
}

impl LedgerEvent {
    /// Registry key this event is published under.
    pub fn id(&self) -> EventId {
        match self {
            LedgerEvent::InitiatedSettlement { channel_id, .. } => {
                EventId::initiated_settlement(*channel_id)
            }
            LedgerEvent::PushedBackSettlement { channel_id, .. } => {
                EventId::pushed_back_settlement(*channel_id)
            }
        }
    }

    /// Deadline carried by the event.
    pub fn deadline(&self) -> Moment {
        match self {
            LedgerEvent::InitiatedSettlement { deadline, .. }
            | LedgerEvent::PushedBackSettlement { deadline, .. } => *deadline,
        }
    }
}
