//! Ledger clock values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default settlement window (in ledger moments) used when none is configured.
pub const DEFAULT_SETTLEMENT_WINDOW: Moment = Moment::new(3_600);

/// A timestamp on the ledger's own clock.
///
/// Monotonic on the ledger timeline. Used both as the current time reported
/// by the clock subscription and as a settlement deadline. The same unit is
/// used for spans such as the settlement window.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Moment(u64);

impl Moment {
    /// The ledger genesis moment.
    pub const ZERO: Moment = Moment(0);

    /// Create a new moment.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// True if `self` lies strictly after `other`.
    pub fn is_after(&self, other: Moment) -> bool {
        self.0 > other.0
    }

    /// Add a span, saturating at the end of the timeline.
    pub fn saturating_add(&self, span: Moment) -> Moment {
        Moment(self.0.saturating_add(span.0))
    }

    /// Span from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_since(&self, earlier: Moment) -> Moment {
        Moment(self.0.saturating_sub(earlier.0))
    }
}

impl From<u64> for Moment {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_after_is_strict() {
        let deadline = Moment::new(100);
        assert!(!Moment::new(99).is_after(deadline));
        assert!(!Moment::new(100).is_after(deadline));
        assert!(Moment::new(101).is_after(deadline));
    }

    #[test]
    fn test_saturating_arithmetic() {
        assert_eq!(Moment::new(u64::MAX).saturating_add(Moment::new(5)), Moment::new(u64::MAX));
        assert_eq!(Moment::new(3).saturating_since(Moment::new(10)), Moment::ZERO);
        assert_eq!(Moment::new(10).saturating_since(Moment::new(3)), Moment::new(7));
    }
}
