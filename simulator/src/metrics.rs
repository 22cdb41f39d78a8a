//! Simulation metrics.

use std::collections::VecDeque;

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Steps executed.
    pub steps: u64,
    /// Waiters registered.
    pub waiters_registered: u64,
    /// Waiters that observed closure.
    pub waiters_closed: u64,
    /// Waiters that resolved with an error.
    pub waiters_failed: u64,
    /// Successful withdrawals.
    pub withdrawals: u64,
    /// Withdrawals refused locally or by the ledger.
    pub withdrawals_rejected: u64,
    pub assertions_passed: u64,
    pub assertions_failed: u64,
    /// Ledger moments between the deadline and a waiter observing closure.
    #[serde(skip)]
    close_delays: VecDeque<u64>,
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            steps: 0,
            waiters_registered: 0,
            waiters_closed: 0,
            waiters_failed: 0,
            withdrawals: 0,
            withdrawals_rejected: 0,
            assertions_passed: 0,
            assertions_failed: 0,
            close_delays: VecDeque::with_capacity(1024),
            max_samples: 1024,
        }
    }

    /// Record a waiter that observed closure `delay` moments after the deadline.
    pub fn record_close(&mut self, delay: u64) {
        self.waiters_closed += 1;

        if self.close_delays.len() >= self.max_samples {
            self.close_delays.pop_front();
        }
        self.close_delays.push_back(delay);
    }

    pub fn record_waiter_failure(&mut self) {
        self.waiters_failed += 1;
    }

    pub fn record_withdraw(&mut self, succeeded: bool) {
        if succeeded {
            self.withdrawals += 1;
        } else {
            self.withdrawals_rejected += 1;
        }
    }

    pub fn record_assertion(&mut self, passed: bool) {
        if passed {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
        }
    }

    /// Average close delay in ledger moments.
    pub fn average_close_delay(&self) -> u64 {
        if self.close_delays.is_empty() {
            return 0;
        }

        let sum: u64 = self.close_delays.iter().sum();
        sum / self.close_delays.len() as u64
    }

    /// Largest close delay seen.
    pub fn max_close_delay(&self) -> u64 {
        self.close_delays.iter().copied().max().unwrap_or(0)
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_close(1);
        metrics.record_close(3);
        metrics.record_close(5);
        metrics.record_waiter_failure();
        metrics.record_withdraw(false);
        metrics.record_withdraw(true);

        assert_eq!(metrics.waiters_closed, 3);
        assert_eq!(metrics.waiters_failed, 1);
        assert_eq!(metrics.average_close_delay(), 3);
        assert_eq!(metrics.max_close_delay(), 5);
        assert_eq!(metrics.withdrawals, 1);
        assert_eq!(metrics.withdrawals_rejected, 1);
    }
}
