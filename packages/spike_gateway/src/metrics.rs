//! Gateway metrics for observability
//!
//! Runtime counters for monitoring gateway health, served by `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Gateway-wide metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Subscriber metrics
    /// Currently connected WebSocket subscribers
    pub active_subscribers: AtomicU64,
    /// Total subscriber connections since start
    pub total_subscribers: AtomicU64,
    /// Status snapshots pushed to subscribers
    pub snapshots_pushed: AtomicU64,

    // Request metrics
    pub status_requests: AtomicU64,
    pub full_status_requests: AtomicU64,
    pub passthrough_requests: AtomicU64,
    pub connection_requests: AtomicU64,

    // Error metrics
    /// Passthrough commands that could not reach an engine
    pub passthrough_failures: AtomicU64,
    /// Malformed gateway requests
    pub bad_requests: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Subscriber tracking
    pub fn subscriber_connected(&self) {
        self.active_subscribers.fetch_add(1, Ordering::Relaxed);
        self.total_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_disconnected(&self) {
        self.active_subscribers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot_pushed(&self) {
        self.snapshots_pushed.fetch_add(1, Ordering::Relaxed);
    }

    // Request tracking
    pub fn status_request(&self) {
        self.status_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn full_status_request(&self) {
        self.full_status_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn passthrough_request(&self) {
        self.passthrough_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_request(&self) {
        self.connection_requests.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn passthrough_failure(&self) {
        self.passthrough_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            subscribers: SubscriberMetrics {
                active: self.active_subscribers.load(Ordering::Relaxed),
                total: self.total_subscribers.load(Ordering::Relaxed),
                snapshots_pushed: self.snapshots_pushed.load(Ordering::Relaxed),
            },
            requests: RequestMetrics {
                status: self.status_requests.load(Ordering::Relaxed),
                full_status: self.full_status_requests.load(Ordering::Relaxed),
                passthrough: self.passthrough_requests.load(Ordering::Relaxed),
                connection: self.connection_requests.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                passthrough_failures: self.passthrough_failures.load(Ordering::Relaxed),
                bad_requests: self.bad_requests.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub subscribers: SubscriberMetrics,
    pub requests: RequestMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberMetrics {
    pub active: u64,
    pub total: u64,
    pub snapshots_pushed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub status: u64,
    pub full_status: u64,
    pub passthrough: u64,
    pub connection: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub passthrough_failures: u64,
    pub bad_requests: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub engines: EngineHealth,
    pub subscribers: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub known: u64,
    pub connected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_tracking() {
        let metrics = GatewayMetrics::new();

        metrics.subscriber_connected();
        metrics.subscriber_connected();
        assert_eq!(metrics.active_subscribers.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_subscribers.load(Ordering::Relaxed), 2);

        metrics.subscriber_disconnected();
        assert_eq!(metrics.active_subscribers.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_subscribers.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_request_tracking() {
        let metrics = GatewayMetrics::new();

        metrics.status_request();
        metrics.passthrough_request();
        metrics.passthrough_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests.status, 1);
        assert_eq!(snapshot.requests.passthrough, 1);
        assert_eq!(snapshot.errors.passthrough_failures, 1);
        assert_eq!(snapshot.errors.bad_requests, 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = GatewayMetrics::new();
        metrics.subscriber_connected();
        metrics.snapshot_pushed();
        metrics.connection_request();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subscribers.active, 1);
        assert_eq!(snapshot.subscribers.snapshots_pushed, 1);
        assert_eq!(snapshot.requests.connection, 1);
    }
}
