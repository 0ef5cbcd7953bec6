//! Metrics instrumentation
//!
//! Thin wrappers over the `metrics` facade. Nothing is recorded unless the
//! application installs a recorder.

/// Label values
pub(crate) mod labels {
    pub const ROLE_CLIENT: &str = "client";
    pub const ROLE_SERVER: &str = "server";

    pub const MODE_CLOSE: &str = "close";
    pub const MODE_FREE: &str = "free";
}

/// Counter metrics
pub(crate) mod counters {
    /// A connection finished its handshake
    pub fn connection_opened(role: &'static str) {
        metrics::counter!("secure_channel_connections_opened_total", "role" => role).increment(1);
    }

    /// A handshake failed terminally
    pub fn handshake_failed(role: &'static str) {
        metrics::counter!("secure_channel_handshake_failures_total", "role" => role).increment(1);
    }

    /// Plaintext bytes accepted by the record layer
    pub fn bytes_sent(count: u64) {
        metrics::counter!("secure_channel_bytes_sent_total").increment(count);
    }

    /// The peer closed while we were sending
    pub fn peer_closed() {
        metrics::counter!("secure_channel_peer_closed_total").increment(1);
    }

    /// Teardown reported a failure after running every cleanup step
    pub fn teardown_failed(mode: &'static str) {
        metrics::counter!("secure_channel_teardown_failures_total", "mode" => mode).increment(1);
    }
}

/// Histogram metrics
pub(crate) mod histograms {
    /// Wall time spent in the handshake loop
    pub fn handshake_duration(role: &'static str, ms: u64) {
        metrics::histogram!("secure_channel_handshake_duration_ms", "role" => role)
            .record(ms as f64);
    }
}
