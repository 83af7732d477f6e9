//! Membership metrics
//!
//! Thin wrappers over the `metrics` crate. The `metrics-prometheus` feature
//! is on by default; without it every call compiles to nothing.
//!
//! ```toml
//! murmur-membership = { version = "0.1", default-features = false }
//! ```

use std::sync::OnceLock;

/// Protocol-level counters and gauges
pub struct MembershipMetrics;

impl MembershipMetrics {
    // ---- Counters ----

    pub fn increment_messages_received(message_type: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("murmur_messages_received_total", "type" => message_type).increment(1);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = message_type;
    }

    pub fn increment_messages_sent(message_type: &'static str, bytes: usize) {
        #[cfg(feature = "metrics-prometheus")]
        {
            metrics::counter!("murmur_messages_sent_total", "type" => message_type).increment(1);
            metrics::counter!("murmur_bytes_sent_total").increment(bytes as u64);
        }
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = (message_type, bytes);
    }

    pub fn increment_send_failures() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("murmur_send_failures_total").increment(1);
    }

    /// Inbound buffers dropped because they failed to decode
    pub fn increment_decode_errors() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("murmur_decode_errors_total").increment(1);
    }

    pub fn increment_members_added() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("murmur_members_added_total").increment(1);
    }

    pub fn increment_members_suspected(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("murmur_members_suspected_total").increment(count as u64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn increment_members_removed(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("murmur_members_removed_total").increment(count as u64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    // ---- Gauges ----

    pub fn set_member_count(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("murmur_member_count").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn set_alive_count(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("murmur_alive_count").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    pub fn set_heartbeat(heartbeat: i64) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("murmur_heartbeat").set(heartbeat as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = heartbeat;
    }
}

#[cfg(feature = "metrics-prometheus")]
mod prom {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    /// Install the Prometheus recorder and serve `/metrics` on `addr`
    pub fn init_prometheus_exporter(
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        PrometheusBuilder::new().with_http_listener(addr).install()?;

        tracing::info!("Prometheus metrics exporter listening on http://{}/metrics", addr);
        Ok(())
    }
}

#[cfg(feature = "metrics-prometheus")]
pub use prom::init_prometheus_exporter;

static METRICS_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the metrics subsystem. Safe to call more than once.
pub fn init_metrics(prometheus_addr: Option<std::net::SocketAddr>) {
    METRICS_INITIALIZED.get_or_init(|| {
        #[cfg(feature = "metrics-prometheus")]
        if let Some(addr) = prometheus_addr {
            if let Err(e) = init_prometheus_exporter(addr) {
                tracing::error!("Failed to start Prometheus exporter: {}", e);
            }
        }
        #[cfg(not(feature = "metrics-prometheus"))]
        if let Some(addr) = prometheus_addr {
            tracing::warn!(%addr, "Metrics address ignored, built without metrics-prometheus");
        }

        tracing::info!(
            prometheus = cfg!(feature = "metrics-prometheus"),
            "Metrics subsystem initialized"
        );
    });
}
