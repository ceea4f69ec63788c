use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct ResearchMetrics {
    worker_runs: Counter<u64>,
    worker_duration_ms: Histogram<f64>,
    tool_calls: Counter<u64>,
    rounds: Counter<u64>,
}

static METRICS: OnceCell<ResearchMetrics> = OnceCell::new();

fn handles() -> &'static ResearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("research.supervisor");
        ResearchMetrics {
            worker_runs: meter
                .u64_counter("research_worker_runs_total")
                .with_description("Research worker executions by status")
                .init(),
            worker_duration_ms: meter
                .f64_histogram("research_worker_duration_ms")
                .with_description("Research worker runtime in milliseconds")
                .init(),
            tool_calls: meter
                .u64_counter("research_tool_calls_total")
                .with_description("Tool calls consumed by research workers")
                .init(),
            rounds: meter
                .u64_counter("research_rounds_total")
                .with_description("Supervisor delegation rounds")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("RESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "RESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export research metrics."
        );
    }
    Ok(())
}

/// Record one finished worker (no-op if no provider installed).
pub fn record_worker_metrics(status: &str, tool_calls: u32, duration_ms: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];

    metrics.worker_runs.add(1, &attrs);
    metrics.worker_duration_ms.record(duration_ms as f64, &attrs);
    metrics.tool_calls.add(u64::from(tool_calls), &attrs);
}

pub fn record_round(requests: usize) {
    handles()
        .rounds
        .add(1, &[KeyValue::new("requests", requests as i64)]);
}
