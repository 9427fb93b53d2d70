use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    audio::FfmpegConverter,
    auth::TokenService,
    encryption::MottoCipher,
    job_store::{JobStore, JobStoreError, MemoryJobStore, RedisJobStore},
    queue::{JobQueue, MemoryJobQueue, QueueError, RedisJobQueue},
    storage::UploadStorage,
    transcription::{MockTranscriber, Transcriber, TranscriptionError, WhisperClient},
    user_store::UserStore,
    worker::{Worker, WorkerSettings},
};

const MOCK_TRANSCRIPTION_DELAY_SECS: u64 = 5;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<UploadStorage>,
    pub cipher: Arc<MottoCipher>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        storage: UploadStorage,
        cipher: MottoCipher,
    ) -> Self {
        let tokens = TokenService::new(&config.jwt_secret, config.jwt_ttl_secs);
        Self {
            config: Arc::new(config),
            users,
            jobs,
            queue,
            storage: Arc::new(storage),
            cipher: Arc::new(cipher),
            tokens: Arc::new(tokens),
        }
    }
}

/// Job store and queue shared by the API and the workers.
pub struct JobBackends {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    /// True when the backends live in this process only.
    pub in_process: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Jobs(#[from] JobStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transcriber(#[from] TranscriptionError),
}

/// Redis when `REDIS_URL` is set, otherwise in-memory.
pub fn job_backends(config: &AppConfig) -> Result<JobBackends, BackendError> {
    match &config.redis_url {
        Some(url) => Ok(JobBackends {
            jobs: Arc::new(RedisJobStore::new(url, config.job_retention_secs)?),
            queue: Arc::new(RedisJobQueue::new(url, config.lease_timeout())?),
            in_process: false,
        }),
        None => Ok(JobBackends {
            jobs: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryJobQueue::new(config.lease_timeout())),
            in_process: true,
        }),
    }
}

/// The configured transcription service, or the mock when no API key is set.
pub fn transcriber(config: &AppConfig) -> Result<Arc<dyn Transcriber>, BackendError> {
    match &config.openai_api_key {
        Some(key) => Ok(Arc::new(WhisperClient::new(
            &config.transcription_base_url,
            key.clone(),
            config.transcription_model.clone(),
            config.transcription_timeout(),
        )?)),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, using mock transcription");
            Ok(Arc::new(MockTranscriber::new(Duration::from_secs(
                MOCK_TRANSCRIPTION_DELAY_SECS,
            ))))
        }
    }
}

/// Worker wired from configuration.
pub fn worker(
    config: &AppConfig,
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    storage: Arc<UploadStorage>,
) -> Result<Worker, BackendError> {
    let converter = Arc::new(FfmpegConverter::new(
        config.ffmpeg_path.clone(),
        config.transcription_timeout(),
    ));
    let settings = WorkerSettings::new(
        config.transcription_timeout(),
        config.retry_base_delay(),
        config.upload_ttl(),
    );
    Ok(Worker::new(
        jobs,
        queue,
        storage,
        converter,
        transcriber(config)?,
        settings,
    ))
}
