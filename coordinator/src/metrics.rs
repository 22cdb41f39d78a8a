//! Counters for settler monitoring.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Settler metrics.
///
/// Shared by the settler, its deadline tracker and its poller.
#[derive(Debug, Default)]
pub struct SettlerMetrics {
    /// Initiate-settlement transactions the ledger accepted.
    pub initiate_submitted: AtomicU64,
    /// Initiate-settlement submissions that failed.
    pub initiate_failed: AtomicU64,
    /// Push-back events applied to the cached deadline.
    pub push_backs: AtomicU64,
    /// Waiters registered.
    pub waiters_registered: AtomicU64,
    /// Waiters notified of closure.
    pub waiters_fired: AtomicU64,
    /// Waiters cancelled before firing.
    pub waiters_cancelled: AtomicU64,
    /// Waiters currently pending.
    pub waiters_pending: AtomicU64,
    /// Clock ticks observed.
    pub clock_ticks: AtomicU64,
    /// Subscriptions released by the settler.
    pub subscriptions_released: AtomicU64,
    /// Withdraw transactions the ledger accepted.
    pub withdrawals: AtomicU64,
}

impl SettlerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initiate_submitted(&self) {
        self.initiate_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn initiate_failed(&self) {
        self.initiate_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_back(&self) {
        self.push_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn waiter_registered(&self) {
        self.waiters_registered.fetch_add(1, Ordering::Relaxed);
        self.waiters_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn waiters_fired(&self, count: usize) {
        self.waiters_fired.fetch_add(count as u64, Ordering::Relaxed);
        self.waiters_pending.fetch_sub(count as u64, Ordering::Relaxed);
    }

    /// Record waiters that left the queue without firing.
    pub fn waiters_cancelled(&self, count: usize) {
        self.waiters_cancelled.fetch_add(count as u64, Ordering::Relaxed);
        self.waiters_pending.fetch_sub(count as u64, Ordering::Relaxed);
    }

    pub fn clock_tick(&self) {
        self.clock_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_released(&self) {
        self.subscriptions_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawn(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            initiate_submitted: self.initiate_submitted.load(Ordering::Relaxed),
            initiate_failed: self.initiate_failed.load(Ordering::Relaxed),
            push_backs: self.push_backs.load(Ordering::Relaxed),
            waiters_registered: self.waiters_registered.load(Ordering::Relaxed),
            waiters_fired: self.waiters_fired.load(Ordering::Relaxed),
            waiters_cancelled: self.waiters_cancelled.load(Ordering::Relaxed),
            waiters_pending: self.waiters_pending.load(Ordering::Relaxed),
            clock_ticks: self.clock_ticks.load(Ordering::Relaxed),
            subscriptions_released: self.subscriptions_released.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        self.snapshot().to_prometheus()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub initiate_submitted: u64,
    pub initiate_failed: u64,
    pub push_backs: u64,
    pub waiters_registered: u64,
    pub waiters_fired: u64,
    pub waiters_cancelled: u64,
    pub waiters_pending: u64,
    pub clock_ticks: u64,
    pub subscriptions_released: u64,
    pub withdrawals: u64,
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let series: [(&str, &str, &str, u64); 10] = [
            ("initiate_submitted_total", "Initiate-settlement transactions accepted", "counter", self.initiate_submitted),
            ("initiate_failed_total", "Initiate-settlement submissions that failed", "counter", self.initiate_failed),
            ("push_backs_total", "Settlement push-backs applied", "counter", self.push_backs),
            ("waiters_registered_total", "Close waiters registered", "counter", self.waiters_registered),
            ("waiters_fired_total", "Close waiters notified", "counter", self.waiters_fired),
            ("waiters_cancelled_total", "Close waiters cancelled", "counter", self.waiters_cancelled),
            ("waiters_pending", "Close waiters currently pending", "gauge", self.waiters_pending),
            ("clock_ticks_total", "Ledger clock ticks observed", "counter", self.clock_ticks),
            ("subscriptions_released_total", "Ledger subscriptions released", "counter", self.subscriptions_released),
            ("withdrawals_total", "Withdraw transactions accepted", "counter", self.withdrawals),
        ];

        let mut out = String::new();
        for (name, help, kind, value) in series {
            let _ = writeln!(out, "# HELP chansettle_{} {}", name, help);
            let _ = writeln!(out, "# TYPE chansettle_{} {}", name, kind);
            let _ = writeln!(out, "chansettle_{} {}", name, value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_gauge_tracks_fire_and_cancel() {
        let metrics = SettlerMetrics::new();
        metrics.waiter_registered();
        metrics.waiter_registered();
        metrics.waiter_registered();
        metrics.waiters_fired(2);
        metrics.waiters_cancelled(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.waiters_registered, 3);
        assert_eq!(snapshot.waiters_fired, 2);
        assert_eq!(snapshot.waiters_cancelled, 1);
        assert_eq!(snapshot.waiters_pending, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = SettlerMetrics::new();
        metrics.push_back();
        let text = metrics.to_prometheus();
        assert!(text.contains("# TYPE chansettle_push_backs_total counter"));
        assert!(text.contains("chansettle_push_backs_total 1"));
        assert!(text.contains("chansettle_waiters_pending 0"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(SettlerMetrics::new().snapshot()).unwrap();
        assert_eq!(json["withdrawals"], 0);
    }
}
