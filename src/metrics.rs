//! Run metrics for the tap
//!
//! Request timing tagged with HTTP status, retry backoff, and per-stream
//! record counts, recorded through the `metrics` facade. Without an installed
//! recorder every call is a no-op; `--metrics-addr` installs the Prometheus
//! exporter.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus exporter and describe the tap's metrics
///
/// Idempotent: later calls are ignored once an exporter is installed.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(%existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the API"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "records_emitted_total",
        Unit::Count,
        "Total number of records emitted per stream"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!(%addr, "Metrics system initialized");
    Ok(())
}

/// Timer for one HTTP attempt
pub struct HttpRequestMetrics {
    stream: String,
    endpoint: String,
    attempt: u32,
    start_time: Instant,
}

impl HttpRequestMetrics {
    /// Start timing an attempt
    pub fn start(stream: impl Into<String>, endpoint: impl Into<String>, attempt: u32) -> Self {
        Self {
            stream: stream.into(),
            endpoint: endpoint.into(),
            attempt,
            start_time: Instant::now(),
        }
    }

    /// Record a response with its status
    pub fn record_complete(&self, status_code: u16) {
        self.record(status_code.to_string());
    }

    /// Record an attempt that timed out
    pub fn record_timeout(&self) {
        self.record("timeout".to_string());
    }

    /// Record an attempt that got no response
    pub fn record_network_error(&self) {
        self.record("network_error".to_string());
    }

    fn record(&self, status: String) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "stream" => self.stream.clone(),
            "status" => status.clone(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "stream" => self.stream.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            stream = %self.stream,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }
}

/// Record a retry sleep
pub fn record_retry_backoff(duration: Duration, reason: &'static str) {
    counter!("http_retries_total", "reason" => reason).increment(1);
    histogram!("retry_backoff_duration_seconds", "reason" => reason)
        .record(duration.as_secs_f64());
}

/// Per-stream record counter
pub struct StreamMetrics {
    stream: String,
    records: u64,
    start_time: Instant,
}

impl StreamMetrics {
    /// Start counting for a stream
    pub fn start(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            records: 0,
            start_time: Instant::now(),
        }
    }

    /// Count an emitted batch
    pub fn increment(&mut self, count: usize) {
        self.records += count as u64;
        counter!("records_emitted_total", "stream" => self.stream.clone())
            .increment(count as u64);
    }

    /// Records counted so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Log the final count
    pub fn finish(&self) {
        info!(
            stream = %self.stream,
            records = self.records,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Stream sync completed"
        );
    }

    /// Log a failure with the count reached so far
    pub fn record_failure(&self, error: &str) {
        warn!(
            stream = %self.stream,
            records = self.records,
            error = %error,
            "Stream sync failed"
        );
    }
}
