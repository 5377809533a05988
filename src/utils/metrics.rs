//! Observability and Metrics
//!
//! Atomic counters for connection, login and message traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for server operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Total login attempts
    pub handshakes_total: AtomicU64,
    /// Successful logins
    pub handshakes_success: AtomicU64,
    /// Failed logins
    pub handshakes_failed: AtomicU64,
    /// Packets read from clients
    pub packets_received: AtomicU64,
    /// Packets queued to clients
    pub packets_sent: AtomicU64,
    /// Packets discarded because the recipient's queue was full
    pub packets_dropped: AtomicU64,
    /// Total bytes read
    pub bytes_received: AtomicU64,
    /// Instant messages delivered to an online peer
    pub messages_delivered: AtomicU64,
    /// Instant messages stored for an offline peer
    pub messages_queued: AtomicU64,
    /// Sessions replaced by a newer login
    pub sessions_evicted: AtomicU64,
    /// Malformed, unrecognized or rejected packets
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            handshakes_total = s.handshakes_total,
            handshakes_success = s.handshakes_success,
            handshakes_failed = s.handshakes_failed,
            packets_received = s.packets_received,
            packets_sent = s.packets_sent,
            packets_dropped = s.packets_dropped,
            bytes_received = s.bytes_received,
            messages_delivered = s.messages_delivered,
            messages_queued = s.messages_queued,
            sessions_evicted = s.sessions_evicted,
            protocol_errors = s.protocol_errors,
            uptime_seconds = s.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub bytes_received: u64,
    pub messages_delivered: u64,
    pub messages_queued: u64,
    pub sessions_evicted: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_connections() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();
        metrics.handshake_attempt();
        metrics.handshake_failed();
        metrics.packet_received(42);

        let s = metrics.snapshot();
        assert_eq!(s.connections_total, 2);
        assert_eq!(s.connections_active, 1);
        assert_eq!(s.handshakes_total, 1);
        assert_eq!(s.handshakes_failed, 1);
        assert_eq!(s.handshakes_success, 0);
        assert_eq!(s.bytes_received, 42);
    }
}
