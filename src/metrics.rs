//! Process-scoped Prometheus metrics, served on a separate port.
//!
//! One `Metrics` instance is constructed at startup and injected into the
//! components that report to it; there are no ambient globals, so tests can
//! build their own registries in isolation.

use std::sync::Arc;

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Latency histogram bucket boundaries, in seconds.
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.2, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 60.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    RateLimited,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::RateLimited => "rate_limited",
        }
    }
}

pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    tokens_generated: IntCounter,
    tokens_processed: IntCounter,
    gpu_utilization: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("llm_requests_total", "Total number of requests"),
            &["endpoint", "status"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("llm_request_latency_seconds", "Request latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["endpoint"],
        )?;
        let tokens_generated = IntCounter::new(
            "llm_tokens_generated_total",
            "Total number of tokens generated",
        )?;
        let tokens_processed = IntCounter::new(
            "llm_tokens_processed_total",
            "Total number of tokens processed",
        )?;
        let gpu_utilization = GaugeVec::new(
            Opts::new("gpu_utilization", "GPU utilization percentage"),
            &["device_index"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(tokens_generated.clone()))?;
        registry.register(Box::new(tokens_processed.clone()))?;
        registry.register(Box::new(gpu_utilization.clone()))?;

        Ok(Self {
            registry,
            requests,
            latency,
            tokens_generated,
            tokens_processed,
            gpu_utilization,
        })
    }

    /// Count a finished request and record its latency. Called for every
    /// request that reaches the orchestrator, whatever the outcome.
    pub fn observe_request(&self, endpoint: &str, outcome: Outcome, latency_secs: f64) {
        self.requests
            .with_label_values(&[endpoint, outcome.as_str()])
            .inc();
        self.latency
            .with_label_values(&[endpoint])
            .observe(latency_secs);
    }

    pub fn add_tokens_generated(&self, n: u64) {
        self.tokens_generated.inc_by(n);
    }

    pub fn add_tokens_processed(&self, n: u64) {
        self.tokens_processed.inc_by(n);
    }

    pub fn set_gpu_utilization(&self, device_index: u32, percent: f64) {
        self.gpu_utilization
            .with_label_values(&[&device_index.to_string()])
            .set(percent);
    }

    #[cfg(test)]
    pub fn request_count(&self, endpoint: &str, outcome: Outcome) -> u64 {
        self.requests
            .with_label_values(&[endpoint, outcome.as_str()])
            .get()
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

async fn scrape(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Router for the metrics listener (distinct port from the API).
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(metrics)
}
