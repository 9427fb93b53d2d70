use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::Display;
use uuid::Uuid;

/// Transient failures are retried this many times before a job is failed.
pub const MAX_RETRIES: u32 = 3;

/// Deliveries a job may start before it is failed outright. Covers every
/// scheduled retry plus headroom for workers that died mid-attempt.
pub const MAX_DELIVERIES: u32 = MAX_RETRIES + 3;

/// State of a transcription job.
///
/// The payload lives inside the variant, so a result exists only for
/// `Succeeded` and an error detail only for `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Succeeded { result: String },
    Failed { error: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Processing => JobStatus::Processing,
            JobState::Succeeded { .. } => JobStatus::Succeeded,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn result(&self) -> Option<&str> {
        match self {
            JobState::Succeeded { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Client-facing state tag of a status poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    /// The identifier never named a job visible to the caller.
    NotFound,
}

/// An asynchronous transcription of one uploaded audio file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub id: Uuid,
    pub owner: Uuid,
    pub audio_path: PathBuf,
    #[serde(flatten)]
    pub state: JobState,
    pub retry_count: u32,
    /// Times a worker has started processing this job, crashed attempts included.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Job is already terminal ({from}), cannot move to {to}")]
    Terminal { from: JobStatus, to: JobStatus },

    #[error("Invalid job transition {from} -> {to}")]
    Invalid { from: JobStatus, to: JobStatus },

    #[error("Retry bound of {} exhausted", MAX_RETRIES)]
    RetriesExhausted,
}

impl TranscriptionJob {
    pub fn new(owner: Uuid, audio_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            audio_path,
            state: JobState::Pending,
            retry_count: 0,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state change, enforcing Pending -> Processing -> {Succeeded, Failed}.
    ///
    /// Processing -> Processing is accepted so that a redelivered job can be
    /// picked up again. Pending -> Failed covers jobs that never made it onto
    /// the queue.
    pub fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        let from = self.state.status();
        let to = next.status();

        if self.state.is_terminal() {
            return Err(TransitionError::Terminal { from, to });
        }

        let allowed = match (&self.state, &next) {
            (JobState::Pending, JobState::Processing) => true,
            (JobState::Pending, JobState::Failed { .. }) => true,
            (JobState::Processing, JobState::Processing) => true,
            (JobState::Processing, JobState::Succeeded { .. }) => true,
            (JobState::Processing, JobState::Failed { .. }) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError::Invalid { from, to });
        }

        if matches!(next, JobState::Processing) {
            self.attempts += 1;
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Count one failed attempt that is about to be retried.
    pub fn record_retry(&mut self) -> Result<u32, TransitionError> {
        if self.state.is_terminal() {
            let from = self.state.status();
            return Err(TransitionError::Terminal { from, to: from });
        }
        if self.retry_count >= MAX_RETRIES {
            return Err(TransitionError::RetriesExhausted);
        }
        self.retry_count += 1;
        self.updated_at = Utc::now();
        Ok(self.retry_count)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }

    /// True once the job has been picked up as often as it may be.
    pub fn deliveries_exhausted(&self) -> bool {
        self.attempts >= MAX_DELIVERIES
    }
}
