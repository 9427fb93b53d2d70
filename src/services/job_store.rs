use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::{JobState, TranscriptionJob, TransitionError};

const JOB_KEY_PREFIX: &str = "motto:job";

const MARKER_APPLIED: &str = "applied";

/// Returns 2 when KEYS[1] is already applied, 1 when this call took the
/// claim for ARGV[1] millis, 0 while another claim is live.
const CLAIM_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == 'applied' then
  return 2
end
if redis.call('SET', KEYS[1], 'claimed', 'NX', 'PX', ARGV[1]) then
  return 1
end
return 0
";

/// Drop KEYS[1] only if it is still a claim.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == 'claimed' then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Outcome of trying to claim a job's reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileClaim {
    /// The caller holds the claim and must complete or release it.
    Claimed,
    /// Another caller holds a live claim.
    InProgress,
    /// The result has been durably applied.
    Applied,
}

/// Shared map from job id to job snapshot.
///
/// Every write replaces the whole snapshot, so readers never observe a state
/// whose result and error fields disagree with it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, owner: Uuid, audio_path: PathBuf)
        -> Result<TranscriptionJob, JobStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<TranscriptionJob>, JobStoreError>;

    async fn set_state(&self, id: Uuid, state: JobState)
        -> Result<TranscriptionJob, JobStoreError>;

    async fn record_retry(&self, id: Uuid) -> Result<TranscriptionJob, JobStoreError>;

    /// Claim the right to reconcile this job's result for `lease`. A claim
    /// that is neither completed nor released lapses after the lease, so a
    /// crashed claimant never blocks the write.
    async fn claim_reconciliation(
        &self,
        id: Uuid,
        lease: Duration,
    ) -> Result<ReconcileClaim, JobStoreError>;

    /// Record that the result was applied. Later claims report `Applied`.
    async fn complete_reconciliation(&self, id: Uuid) -> Result<(), JobStoreError>;

    /// Give up a claim so the next caller can retry. An applied marker stays.
    async fn release_reconciliation(&self, id: Uuid) -> Result<(), JobStoreError>;

    async fn health_check(&self) -> Result<(), JobStoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// In-process job store for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryJobs>,
}

#[derive(Default)]
struct MemoryJobs {
    jobs: HashMap<Uuid, TranscriptionJob>,
    markers: HashMap<Uuid, Marker>,
}

enum Marker {
    Claimed { until: Instant },
    Applied,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<TranscriptionJob, JobStoreError>
    where
        F: FnOnce(&mut TranscriptionJob) -> Result<(), TransitionError>,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let job = inner.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;

        // Mutate a copy so a rejected transition leaves the stored snapshot untouched.
        let mut next = job.clone();
        apply(&mut next)?;
        *job = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        owner: Uuid,
        audio_path: PathBuf,
    ) -> Result<TranscriptionJob, JobStoreError> {
        let job = TranscriptionJob::new(owner, audio_path);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TranscriptionJob>, JobStoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn set_state(
        &self,
        id: Uuid,
        state: JobState,
    ) -> Result<TranscriptionJob, JobStoreError> {
        self.update(id, |job| job.transition(state))
    }

    async fn record_retry(&self, id: Uuid) -> Result<TranscriptionJob, JobStoreError> {
        self.update(id, |job| job.record_retry().map(|_| ()))
    }

    async fn claim_reconciliation(
        &self,
        id: Uuid,
        lease: Duration,
    ) -> Result<ReconcileClaim, JobStoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.markers.get(&id) {
            Some(Marker::Applied) => Ok(ReconcileClaim::Applied),
            Some(Marker::Claimed { until }) if *until > now => Ok(ReconcileClaim::InProgress),
            _ => {
                inner.markers.insert(id, Marker::Claimed { until: now + lease });
                Ok(ReconcileClaim::Claimed)
            }
        }
    }

    async fn complete_reconciliation(&self, id: Uuid) -> Result<(), JobStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.markers.insert(id, Marker::Applied);
        Ok(())
    }

    async fn release_reconciliation(&self, id: Uuid) -> Result<(), JobStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(inner.markers.get(&id), Some(Marker::Claimed { .. })) {
            inner.markers.remove(&id);
        }
        Ok(())
    }
}

/// Redis-backed job store shared between the API and worker processes.
///
/// Each job is one JSON document, written with a single `SET`. Only the worker
/// holding the job's queue lease writes to it, so read-modify-write is safe.
pub struct RedisJobStore {
    client: redis::Client,
    retention_secs: u64,
    claim_script: redis::Script,
    release_script: redis::Script,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, retention_secs: u64) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url).map_err(JobStoreError::Redis)?;
        Ok(Self {
            client,
            retention_secs,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    fn job_key(id: Uuid) -> String {
        format!("{JOB_KEY_PREFIX}:{id}")
    }

    fn reconciled_key(id: Uuid) -> String {
        format!("{JOB_KEY_PREFIX}:{id}:reconciled")
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: Uuid,
    ) -> Result<Option<TranscriptionJob>, JobStoreError> {
        let payload: Option<String> = conn.get(Self::job_key(id)).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &TranscriptionJob,
    ) -> Result<(), JobStoreError> {
        let payload = serde_json::to_string(job)?;
        if job.state.is_terminal() {
            // Terminal jobs are kept for polling, then expire.
            conn.set_ex::<_, _, ()>(Self::job_key(job.id), payload, self.retention_secs)
                .await?;
        } else {
            conn.set::<_, _, ()>(Self::job_key(job.id), payload).await?;
        }
        Ok(())
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<TranscriptionJob, JobStoreError>
    where
        F: FnOnce(&mut TranscriptionJob) -> Result<(), TransitionError> + Send,
    {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut job = self
            .load(&mut conn, id)
            .await?
            .ok_or(JobStoreError::NotFound(id))?;
        apply(&mut job)?;
        self.save(&mut conn, &job).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(
        &self,
        owner: Uuid,
        audio_path: PathBuf,
    ) -> Result<TranscriptionJob, JobStoreError> {
        let job = TranscriptionJob::new(owner, audio_path);
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.save(&mut conn, &job).await?;
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TranscriptionJob>, JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.load(&mut conn, id).await
    }

    async fn set_state(
        &self,
        id: Uuid,
        state: JobState,
    ) -> Result<TranscriptionJob, JobStoreError> {
        self.update(id, move |job| job.transition(state)).await
    }

    async fn record_retry(&self, id: Uuid) -> Result<TranscriptionJob, JobStoreError> {
        self.update(id, |job| job.record_retry().map(|_| ())).await
    }

    async fn claim_reconciliation(
        &self,
        id: Uuid,
        lease: Duration,
    ) -> Result<ReconcileClaim, JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let lease_ms = lease.as_millis().max(1) as u64;
        let outcome: i64 = self
            .claim_script
            .key(Self::reconciled_key(id))
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(match outcome {
            2 => ReconcileClaim::Applied,
            1 => ReconcileClaim::Claimed,
            _ => ReconcileClaim::InProgress,
        })
    }

    async fn complete_reconciliation(&self, id: Uuid) -> Result<(), JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(Self::reconciled_key(id), MARKER_APPLIED, self.retention_secs)
            .await?;
        Ok(())
    }

    async fn release_reconciliation(&self, id: Uuid) -> Result<(), JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = self
            .release_script
            .key(Self::reconciled_key(id))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
