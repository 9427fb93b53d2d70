use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Allowance for multipart boundaries and part headers around the audio file.
const MULTIPART_ENVELOPE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3002"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Users are kept in memory when unset.
    pub database_url: Option<String>,

    /// Redis connection string for the job store and queue. When unset the
    /// server keeps jobs in memory and runs the worker in-process.
    pub redis_url: Option<String>,

    /// HMAC secret for issuing access tokens
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    #[serde(default = "default_jwt_ttl_secs")]
    pub jwt_ttl_secs: u64,

    /// AES-256-GCM motto key (base64-encoded, 32 bytes). Generated per process when unset.
    pub encryption_key: Option<String>,

    /// Transcription API key. The mock transcriber is used when unset.
    pub openai_api_key: Option<String>,

    #[serde(default = "default_transcription_base_url")]
    pub transcription_base_url: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Upper bound for a single conversion or transcription attempt
    #[serde(default = "default_transcription_timeout_secs")]
    pub transcription_timeout_secs: u64,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Root of the temporary upload area
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Uploads older than this are reclaimed by the worker janitor
    #[serde(default = "default_upload_ttl_secs")]
    pub upload_ttl_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Base delay of the exponential retry backoff
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Visibility timeout of a dequeued job before it is redelivered
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// How long terminal jobs stay readable in Redis
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Oldest client accepted through the `app-version` header
    #[serde(default = "default_min_client_version")]
    pub min_client_version: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

fn default_jwt_ttl_secs() -> u64 {
    900
}

fn default_transcription_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_transcription_timeout_secs() -> u64 {
    30
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_upload_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_lease_timeout_secs() -> u64 {
    120
}

fn default_job_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_min_client_version() -> String {
    "1.2.0".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Configuration with every default applied, for tests and local tooling.
    pub fn with_jwt_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: None,
            redis_url: None,
            jwt_secret: jwt_secret.into(),
            jwt_ttl_secs: default_jwt_ttl_secs(),
            encryption_key: None,
            openai_api_key: None,
            transcription_base_url: default_transcription_base_url(),
            transcription_model: default_transcription_model(),
            transcription_timeout_secs: default_transcription_timeout_secs(),
            ffmpeg_path: default_ffmpeg_path(),
            upload_dir: default_upload_dir(),
            upload_ttl_secs: default_upload_ttl_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            lease_timeout_secs: default_lease_timeout_secs(),
            job_retention_secs: default_job_retention_secs(),
            worker_concurrency: default_worker_concurrency(),
            min_client_version: default_min_client_version(),
        }
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_ttl_secs)
    }

    /// Request body limit: a full-size upload plus its multipart envelope.
    pub fn max_request_bytes(&self) -> usize {
        self.max_upload_bytes + MULTIPART_ENVELOPE_BYTES
    }
}
