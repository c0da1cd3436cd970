use metrics::{counter, histogram};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

use crate::pipeline::orchestrator::IngestionOutcome;

pub const RECORDS_DECODED: &str = "geo_ingest_records_decoded_total";
pub const RECORDS_REJECTED: &str = "geo_ingest_records_rejected_total";
pub const RECORDS_PERSISTED: &str = "geo_ingest_records_persisted_total";
pub const BATCH_FAILURES: &str = "geo_ingest_batch_failures_total";
pub const DELIVERIES: &str = "geo_ingest_deliveries_total";
pub const BATCH_WRITE_SECONDS: &str = "geo_ingest_batch_write_duration_seconds";

/// Install the Prometheus exporter on `port`. Without it the macros are no-ops.
pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening on /metrics"),
        Err(e) => warn!(error = %e, "Prometheus exporter install failed (possibly already installed)"),
    }
}

pub fn record_batch_write(elapsed: Duration, succeeded: bool) {
    let result = if succeeded { "committed" } else { "rolled_back" };
    histogram!(BATCH_WRITE_SECONDS, "result" => result).record(elapsed.as_secs_f64());
}

pub fn record_outcome(outcome: &IngestionOutcome) {
    counter!(DELIVERIES).increment(1);
    counter!(RECORDS_DECODED).increment(outcome.decoded as u64);
    counter!(RECORDS_REJECTED).increment(outcome.rejected as u64);
    counter!(RECORDS_PERSISTED).increment(outcome.persisted as u64);
    counter!(BATCH_FAILURES).increment(outcome.batch_failures.len() as u64);
}
