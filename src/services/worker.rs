use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::models::job::{JobState, TranscriptionJob, MAX_RETRIES};
use crate::services::{
    audio::{AudioConverter, ConversionError},
    job_store::{JobStore, JobStoreError},
    queue::{Delivery, JobQueue, QueueError},
    storage::UploadStorage,
    transcription::{Transcriber, TranscriptionError},
};

const IDLE_POLL_INTERVAL_MS: u64 = 1000;
const JANITOR_INTERVAL_SECS: u64 = 300;
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Upper bound on one transcription call
    pub transcription_timeout: Duration,
    /// First retry delay; doubled for every further retry
    pub retry_base_delay: Duration,
    pub idle_poll_interval: Duration,
    /// Uploads older than this are deleted by the janitor
    pub upload_ttl: Duration,
    pub janitor_interval: Duration,
}

impl WorkerSettings {
    pub fn new(transcription_timeout: Duration, retry_base_delay: Duration, upload_ttl: Duration) -> Self {
        Self {
            transcription_timeout,
            retry_base_delay,
            idle_poll_interval: Duration::from_millis(IDLE_POLL_INTERVAL_MS),
            upload_ttl,
            janitor_interval: Duration::from_secs(JANITOR_INTERVAL_SECS),
        }
    }
}

/// Why an attempt did not produce a transcript.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// The upload cannot be converted. Not retried.
    #[error("Malformed audio: {0}")]
    Malformed(#[from] ConversionError),

    /// Network, timeout or service failure. Retried up to the bound.
    #[error(transparent)]
    Transient(#[from] TranscriptionError),
}

/// Infrastructure failure while handling a delivery. The lease is left in
/// place so the job is redelivered once it expires.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Job store error: {0}")]
    Store(#[from] JobStoreError),
}

/// Pulls transcription jobs off the queue and records their outcome.
pub struct Worker {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    storage: Arc<UploadStorage>,
    converter: Arc<dyn AudioConverter>,
    transcriber: Arc<dyn Transcriber>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        storage: Arc<UploadStorage>,
        converter: Arc<dyn AudioConverter>,
        transcriber: Arc<dyn Transcriber>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            jobs,
            queue,
            storage,
            converter,
            transcriber,
            settings,
        }
    }

    /// Main processing loop. Returns once `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(transcriber = self.transcriber.name(), "Worker loop started");

        while !*shutdown.borrow() {
            match self.process_next().await {
                Ok(true) => {
                    // Job handled, continue immediately
                    tracing::debug!("Job processed, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!("No jobs available, sleeping");
                    tokio::select! {
                        _ = sleep(self.settings.idle_poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error processing job, will retry");
                    sleep(self.settings.idle_poll_interval).await;
                }
            }
        }

        tracing::info!("Worker loop stopped");
    }

    /// Periodically reclaim abandoned uploads and publish the queue depth.
    pub async fn run_janitor(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            match self.storage.reclaim_older_than(self.settings.upload_ttl).await {
                Ok(count) if count > 0 => {
                    metrics::counter!("transcription_uploads_reclaimed_total").increment(count as u64);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Upload reclamation failed"),
            }

            if let Ok(depth) = self.queue.depth().await {
                metrics::gauge!("transcription_queue_depth").set(depth as f64);
            }

            tokio::select! {
                _ = sleep(self.settings.janitor_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Process the next job from the queue.
    /// Returns Ok(true) if a delivery was handled, Ok(false) if none was available.
    pub async fn process_next(&self) -> Result<bool, WorkerError> {
        self.queue.requeue_due().await?;

        let delivery = match self.queue.dequeue().await? {
            Some(d) => d,
            None => return Ok(false),
        };
        let job_id = delivery.job.job_id;

        let job = match self.jobs.get(job_id).await? {
            Some(job) => job,
            None => {
                tracing::warn!(job_id = %job_id, "Dropping delivery for unknown job");
                self.queue.ack(&delivery).await?;
                return Ok(true);
            }
        };

        // At-least-once delivery: a redelivered job may already be finished.
        if job.state.is_terminal() {
            tracing::debug!(job_id = %job_id, "Skipping delivery for terminal job");
            self.queue.ack(&delivery).await?;
            return Ok(true);
        }

        // Every earlier delivery ended without an outcome, so its worker died.
        if job.deliveries_exhausted() {
            let detail = format!(
                "Transcription abandoned after {} interrupted attempts",
                job.attempts
            );
            tracing::error!(job_id = %job_id, attempts = job.attempts, "Job keeps crashing workers, failing it");
            self.fail(&job, &delivery, detail).await?;
            return Ok(true);
        }

        let job = self.jobs.set_state(job_id, JobState::Processing).await?;

        tracing::info!(
            job_id = %job.id,
            audio = %job.audio_path.display(),
            retry_count = job.retry_count,
            attempts = job.attempts,
            "Processing transcription job"
        );

        let start = Instant::now();
        match self.attempt(&job).await {
            Ok(text) => {
                self.jobs
                    .set_state(job_id, JobState::Succeeded { result: text })
                    .await?;
                self.storage.remove_artifacts(&job.audio_path).await;
                self.queue.ack(&delivery).await?;

                metrics::counter!("transcription_jobs_completed_total").increment(1);
                metrics::histogram!("transcription_processing_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    job_id = %job_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
            }
            Err(e @ ProcessingError::Malformed(_)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Audio rejected, not retrying");
                self.fail(&job, &delivery, e.to_string()).await?;
            }
            Err(ProcessingError::Transient(e)) if job.can_retry() => {
                let job = self.jobs.record_retry(job_id).await?;
                let delay = self.backoff(job.retry_count);

                // The intermediate is regenerated on the next attempt.
                let converted = UploadStorage::converted_path(&job.audio_path);
                if let Err(remove_err) = self.storage.remove(&converted).await {
                    tracing::warn!(job_id = %job_id, error = %remove_err, "Failed to delete intermediate");
                }
                self.queue.retry_later(&delivery, delay).await?;

                metrics::counter!("transcription_jobs_retried_total").increment(1);
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    retry_count = job.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, job re-queued for retry"
                );
            }
            Err(ProcessingError::Transient(e)) => {
                let detail = format!("Transcription failed after {} retries: {}", MAX_RETRIES, e);
                tracing::warn!(job_id = %job_id, error = %e, "Job failed after max retries");
                self.fail(&job, &delivery, detail).await?;
            }
        }

        Ok(true)
    }

    /// Delay before retry number `retry_count` (1-based).
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(16);
        self.settings
            .retry_base_delay
            .saturating_mul(1 << exponent)
            .min(MAX_BACKOFF)
    }

    async fn attempt(&self, job: &TranscriptionJob) -> Result<String, ProcessingError> {
        let converted = UploadStorage::converted_path(&job.audio_path);

        tracing::debug!(job_id = %job.id, "Converting audio");
        self.converter.convert(&job.audio_path, &converted).await?;

        tracing::debug!(job_id = %job.id, transcriber = self.transcriber.name(), "Calling transcription service");
        let timeout = self.settings.transcription_timeout;
        let text = tokio::time::timeout(timeout, self.transcriber.transcribe(&converted))
            .await
            .map_err(|_| TranscriptionError::Timeout(timeout))??;

        Ok(text)
    }

    async fn fail(
        &self,
        job: &TranscriptionJob,
        delivery: &Delivery,
        error: String,
    ) -> Result<(), WorkerError> {
        self.jobs
            .set_state(job.id, JobState::Failed { error })
            .await?;
        self.storage.remove_artifacts(&job.audio_path).await;
        self.queue.ack(delivery).await?;

        metrics::counter!("transcription_jobs_failed_total").increment(1);
        Ok(())
    }
}
