//! Prometheus export for the `metrics` facade.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// Installs the global Prometheus recorder. Later calls are no-ops, so test
/// binaries that spawn several applications share one recorder.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    let _install = INSTALL
        .lock()
        .map_err(|_| anyhow::anyhow!("Metrics install lock poisoned"))?;
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();
    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

fn describe_metrics() {
    describe_counter!("uploads_total", "Upload workflows by outcome");
    describe_counter!("artifacts_staged_total", "Artifacts accepted by the store");
    describe_counter!("artifacts_expired_total", "Artifacts removed by the sweeper");
    describe_gauge!("artifacts_staged", "Artifacts currently staged");
    describe_counter!(
        "artifact_store_rejected_total",
        "Uploads refused because the store was full"
    );
    describe_counter!("backend_calls_total", "Backend calls by capability and outcome");
    describe_histogram!(
        "backend_call_duration_seconds",
        Unit::Seconds,
        "Backend call latency by capability"
    );
    describe_counter!("analysis_retries_total", "Analysis attempts repeated after a transient failure");
    describe_counter!("analyses_total", "Unit analyses by profile and status");
    describe_counter!("admission_rejected_total", "Requests refused by the admission gate");
    describe_gauge!("backend_calls_in_flight", "Admitted analysis workflows");
    describe_counter!("sessions_created_total", "Sessions created");
    describe_counter!("sessions_closed_total", "Sessions removed, by reason");
    describe_gauge!("sessions_active", "Live sessions");
}
