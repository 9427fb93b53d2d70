use std::time::Duration;
use uuid::Uuid;

use crate::services::{
    encryption::{EncryptionError, MottoCipher},
    job_store::{JobStore, JobStoreError, ReconcileClaim},
    user_store::{UserStore, UserStoreError},
};

/// How long a poll may hold the claim while it writes the motto.
pub const CLAIM_LEASE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// This call wrote the result into the user's motto.
    Applied,
    /// An earlier poll already wrote it.
    AlreadyApplied,
    /// Another poll is writing it right now. It may still fail and release.
    InProgress,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("User not found")]
    UserMissing,

    #[error("Failed to encrypt motto: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("User store error: {0}")]
    Users(#[from] UserStoreError),

    #[error("Job store error: {0}")]
    Jobs(#[from] JobStoreError),
}

/// Copy a succeeded job's transcript into the owner's motto, once.
///
/// A short claim guards the write. Only after the motto is stored is the
/// marker made durable; a failed write releases the claim and a crashed
/// writer's claim lapses after [`CLAIM_LEASE`], so a later poll retries.
/// The job itself is never touched.
pub async fn apply_result(
    jobs: &dyn JobStore,
    users: &dyn UserStore,
    cipher: &MottoCipher,
    job_id: Uuid,
    user_id: Uuid,
    transcript: &str,
) -> Result<Reconciliation, ReconcileError> {
    match jobs.claim_reconciliation(job_id, CLAIM_LEASE).await? {
        ReconcileClaim::Applied => return Ok(Reconciliation::AlreadyApplied),
        ReconcileClaim::InProgress => return Ok(Reconciliation::InProgress),
        ReconcileClaim::Claimed => {}
    }

    match write_motto(users, cipher, user_id, transcript).await {
        Ok(()) => {
            jobs.complete_reconciliation(job_id).await?;
            tracing::info!(job_id = %job_id, user_id = %user_id, "Motto updated from transcription");
            Ok(Reconciliation::Applied)
        }
        Err(e) => {
            if let Err(release_err) = jobs.release_reconciliation(job_id).await {
                tracing::error!(job_id = %job_id, error = %release_err, "Failed to release reconciliation claim");
            }
            Err(e)
        }
    }
}

async fn write_motto(
    users: &dyn UserStore,
    cipher: &MottoCipher,
    user_id: Uuid,
    transcript: &str,
) -> Result<(), ReconcileError> {
    let encrypted = cipher.encrypt_motto(transcript)?;
    if users.update_motto(user_id, &encrypted).await? {
        Ok(())
    } else {
        Err(ReconcileError::UserMissing)
    }
}
