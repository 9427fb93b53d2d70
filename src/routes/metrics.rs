use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe the pipeline metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "transcription_jobs_submitted_total",
        "Total transcription jobs submitted"
    );
    metrics::describe_counter!(
        "transcription_jobs_completed_total",
        "Total transcription jobs completed"
    );
    metrics::describe_counter!(
        "transcription_jobs_failed_total",
        "Total transcription jobs that failed terminally"
    );
    metrics::describe_counter!(
        "transcription_jobs_retried_total",
        "Total transient failures scheduled for retry"
    );
    metrics::describe_counter!(
        "transcription_uploads_reclaimed_total",
        "Abandoned uploads deleted by the janitor"
    );
    metrics::describe_histogram!(
        "transcription_processing_seconds",
        "Time to convert and transcribe one job"
    );
    metrics::describe_gauge!(
        "transcription_queue_depth",
        "Current number of jobs waiting in the queue"
    );

    Ok(Arc::new(handle))
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
