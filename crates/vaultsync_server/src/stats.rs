//! Service statistics.
//!
//! Counters are atomic and can be read while requests are in flight;
//! reading them never touches the store's write path.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Request counters and timing aggregates.
#[derive(Debug)]
pub struct ServiceStats {
    requests: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
    started: Instant,
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceStats {
    /// Creates zeroed statistics starting the uptime clock now.
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Records one finished request.
    pub fn record(&self, elapsed: Duration, succeeded: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        if !succeeded {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Requests handled so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Requests that ended in an error.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Mean handling time in milliseconds, 0 before the first request.
    pub fn avg_response_time_ms(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }
        self.total_micros.load(Ordering::Relaxed) as f64 / requests as f64 / 1000.0
    }

    /// Time since the service started.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// The `stats` operation's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Live (unexpired) records.
    pub total_records: usize,
    /// Distinct session ids among live records.
    pub total_sessions: usize,
    /// Bytes used by the record journal.
    pub storage_used: u64,
    /// Mean request handling time in milliseconds.
    pub avg_response_time: f64,
    /// Seconds since the service started.
    pub uptime: u64,
    /// Requests handled.
    pub requests: u64,
    /// Requests that failed.
    pub failures: u64,
    /// Backups held by the vault.
    pub backups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_requests() {
        let stats = ServiceStats::new();
        assert_eq!(stats.avg_response_time_ms(), 0.0);

        stats.record(Duration::from_millis(2), true);
        stats.record(Duration::from_millis(4), false);

        assert_eq!(stats.requests(), 2);
        assert_eq!(stats.failures(), 1);
        assert!((stats.avg_response_time_ms() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_wire_names() {
        let snapshot = StatsSnapshot {
            total_records: 3,
            total_sessions: 1,
            storage_used: 512,
            avg_response_time: 1.5,
            uptime: 9,
            requests: 4,
            failures: 0,
            backups: 0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["totalRecords"], 3);
        assert_eq!(json["storageUsed"], 512);
        assert_eq!(json["avgResponseTime"], 1.5);
    }
}
