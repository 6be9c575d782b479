//! Prometheus exporter plus runtime-level metric recorders.
//!
//! Business metrics (bookings, promotions, invariant violations) live next to
//! the code that records them in the `booking` crate; this module owns the
//! exporter and the metrics emitted by the runtime helpers themselves.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatkeeper_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Expose metrics on port 9090
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Latency buckets shared by every `*_duration_seconds` histogram.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Prometheus metrics server.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    fn builder(&self) -> Result<PrometheusBuilder, MetricsError> {
        register_metrics();
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                DURATION_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// Install the recorder without an HTTP listener; scrape with [`Self::render`].
    ///
    /// # Errors
    ///
    /// Returns `Install` if a different recorder could not be replaced.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), this logs a
    /// warning and succeeds with no handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = self.builder()?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Install the recorder and serve `/metrics` on the configured address.
    ///
    /// Must be called from within a tokio runtime; the listener runs on it.
    ///
    /// # Errors
    ///
    /// Returns `Install` if the recorder or listener could not be installed.
    pub fn serve(&self) -> Result<(), MetricsError> {
        self.builder()?
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if [`Self::start`] has not installed a recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Retry
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );

    // Promotion queue
    describe_counter!(
        "promotion_queue_enqueued_total",
        "Total number of promotion checks enqueued"
    );
    describe_counter!(
        "promotion_queue_delivered_total",
        "Total number of promotion checks handed to a consumer"
    );
    describe_counter!(
        "promotion_queue_errors_total",
        "Total number of promotion queue failures"
    );
    describe_histogram!(
        "promotion_queue_wait_duration_seconds",
        "Time between enqueue and delivery of a promotion check"
    );
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

/// Promotion queue metrics recorder, shared by every queue backend.
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record an enqueue.
    pub fn record_enqueue(backend: &'static str) {
        counter!("promotion_queue_enqueued_total", "backend" => backend).increment(1);
    }

    /// Record a delivery and how long the check waited.
    pub fn record_delivery(backend: &'static str, waited: std::time::Duration) {
        counter!("promotion_queue_delivered_total", "backend" => backend).increment(1);
        histogram!("promotion_queue_wait_duration_seconds", "backend" => backend)
            .record(waited.as_secs_f64());
    }

    /// Record a backend failure.
    pub fn record_error(backend: &'static str) {
        counter!("promotion_queue_errors_total", "backend" => backend).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
        // Handle is None if another test already installed the recorder
        if server.handle().is_some() {
            RetryMetrics::record_exhausted();
            let rendered = server.render().unwrap();
            assert!(rendered.contains("retry_exhausted_total"));
        }
    }

    #[test]
    fn recorders_work_without_installed_exporter() {
        RetryMetrics::record_attempt();
        RetryMetrics::record_success();
        RetryMetrics::record_exhausted();
        QueueMetrics::record_enqueue("channel");
        QueueMetrics::record_delivery("channel", std::time::Duration::from_millis(3));
        QueueMetrics::record_error("channel");
    }
}
