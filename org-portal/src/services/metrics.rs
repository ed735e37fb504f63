use anyhow::Result;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static GATE_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;

    let request_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;

    let gate_decisions = IntCounterVec::new(
        Opts::new(
            "gate_decisions_total",
            "Gate outcomes per checkpoint (interceptor, guard)",
        ),
        &["checkpoint", "outcome"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(request_duration.clone()))?;
    registry.register(Box::new(gate_decisions.clone()))?;

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = GATE_DECISIONS_TOTAL.set(gate_decisions);
    Ok(())
}

/// Count one gate outcome. No-op until `init_metrics` has run.
pub fn record_gate_decision(checkpoint: &str, outcome: &str) {
    if let Some(counter) = GATE_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[checkpoint, outcome]).inc();
    }
}

pub fn get_metrics() -> Result<String> {
    let registry = REGISTRY
        .get()
        .ok_or_else(|| anyhow::anyhow!("metrics registry not initialized"))?;
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
