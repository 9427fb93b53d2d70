//! Test helpers: an in-process server wired to in-memory backends and
//! scriptable stand-ins for ffmpeg and the transcription service.

#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use uuid::Uuid;

use motto_transcribe::{
    app_state::AppState,
    config::AppConfig,
    models::user::{NewUser, User},
    routes,
    services::{
        audio::{AudioConverter, ConversionError},
        encryption::MottoCipher,
        job_store::{JobStore, MemoryJobStore},
        queue::{JobQueue, MemoryJobQueue},
        storage::UploadStorage,
        transcription::{Transcriber, TranscriptionError},
        user_store::{MemoryUserStore, UserStore, UserStoreError},
        worker::{Worker, WorkerSettings},
    },
};

pub const CLIENT_VERSION: &str = "1.2.0";
pub const TEST_PASSWORD: &str = "correct horse battery";

/// Response from POST /api/v1/transcriptions
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub state: String,
    pub message: String,
}

/// Response from GET /api/v1/transcriptions/{job_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub state: String,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Copies the upload through, rejecting anything that starts with `garbage`.
pub struct FakeConverter;

#[async_trait]
impl AudioConverter for FakeConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let data = tokio::fs::read(input)
            .await
            .map_err(|e| ConversionError::Unreadable(e.to_string()))?;
        if data.starts_with(b"garbage") {
            return Err(ConversionError::Malformed("Invalid data found".to_string()));
        }
        tokio::fs::write(output, data)
            .await
            .map_err(|e| ConversionError::Unreadable(e.to_string()))
    }
}

/// One scripted transcription outcome.
pub enum Step {
    Text(String),
    /// Sleep well past any test timeout.
    Hang,
    /// Wait for `release` before returning the text.
    Gate(Arc<Notify>, String),
    /// Take the worker down mid-attempt.
    Crash,
}

/// Plays back scripted steps in order; falls back to `default` once empty.
pub struct ScriptedTranscriber {
    steps: Mutex<VecDeque<Step>>,
    default: String,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(default: &str) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default: default.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(audio_path.exists(), "converted audio missing");

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Text(text)) => Ok(text),
            Some(Step::Hang) => {
                sleep(Duration::from_secs(3600)).await;
                Ok(self.default.clone())
            }
            Some(Step::Gate(release, text)) => {
                release.notified().await;
                Ok(text)
            }
            Some(Step::Crash) => panic!("worker crashed while transcribing"),
            None => Ok(self.default.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Memory user store that counts motto writes.
#[derive(Default)]
pub struct CountingUserStore {
    inner: MemoryUserStore,
    pub motto_writes: AtomicUsize,
}

impl CountingUserStore {
    pub fn remove(&self, id: Uuid) -> bool {
        self.inner.remove(id)
    }
}

#[async_trait]
impl UserStore for CountingUserStore {
    async fn create(&self, user: NewUser) -> Result<User, UserStoreError> {
        self.inner.create(user).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        self.inner.find_by_username(username).await
    }

    async fn update_motto(&self, id: Uuid, encrypted_motto: &str) -> Result<bool, UserStoreError> {
        self.motto_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_motto(id, encrypted_motto).await
    }
}

/// A running server plus direct handles on its backends.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub users: Arc<CountingUserStore>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub cipher: Arc<MottoCipher>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub worker: Arc<Worker>,
    pub upload_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestApp {
    /// Spawn a server; the worker is driven by the test via `process_next`.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}, Duration::from_secs(60)).await
    }

    /// Like [`TestApp::spawn`], with configuration overrides and a custom
    /// queue lease.
    pub async fn spawn_with(configure: impl FnOnce(&mut AppConfig), lease_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let upload_dir = dir.path().join("uploads");

        let mut config = AppConfig::with_jwt_secret("integration-test-secret");
        config.upload_dir = upload_dir.clone();
        configure(&mut config);

        let users = Arc::new(CountingUserStore::default());
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(lease_timeout));
        let storage = UploadStorage::new(&upload_dir).expect("upload dir");
        let transcriber = Arc::new(ScriptedTranscriber::new("hello world"));

        let state = AppState::new(
            config,
            users.clone(),
            jobs.clone(),
            queue.clone(),
            storage,
            MottoCipher::ephemeral(),
        );
        let cipher = state.cipher.clone();

        let worker = Arc::new(Worker::new(
            jobs.clone(),
            queue.clone(),
            state.storage.clone(),
            Arc::new(FakeConverter),
            transcriber.clone(),
            WorkerSettings::new(
                Duration::from_millis(200),
                Duration::ZERO,
                Duration::from_secs(3600),
            ),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = routes::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server");
        });

        let mut headers = HeaderMap::new();
        headers.insert("app-version", HeaderValue::from_static(CLIENT_VERSION));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("client");

        Self {
            base_url: format!("http://{}", addr),
            client,
            users,
            jobs,
            queue,
            cipher,
            transcriber,
            worker,
            upload_dir,
            _dir: dir,
        }
    }

    /// Register a user and return their token.
    pub async fn register(&self, username: &str) -> String {
        let response = self
            .client
            .post(format!("{}/api/v1/register", self.base_url))
            .json(&serde_json::json!({
                "username": username,
                "password": TEST_PASSWORD,
                "motto": "carpe diem",
            }))
            .send()
            .await
            .expect("register request");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: serde_json::Value = response.json().await.expect("register body");
        body["token"].as_str().expect("token").to_string()
    }

    pub async fn upload(
        &self,
        token: &str,
        filename: &str,
        data: &[u8],
    ) -> reqwest::Response {
        let form = multipart::Form::new().part(
            "audio",
            multipart::Part::bytes(data.to_vec())
                .file_name(filename.to_string())
                .mime_str("audio/webm")
                .expect("mime"),
        );
        self.client
            .post(format!("{}/api/v1/transcriptions", self.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .expect("upload request")
    }

    /// Upload and expect the job to be accepted.
    pub async fn submit(&self, token: &str, filename: &str, data: &[u8]) -> Uuid {
        let response = self.upload(token, filename, data).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        let body: UploadResponse = response.json().await.expect("upload body");
        assert_eq!(body.state, "Pending");
        body.job_id
    }

    pub async fn poll(&self, token: &str, job_id: &str) -> (reqwest::StatusCode, JobStatusResponse) {
        let response = self
            .client
            .get(format!("{}/api/v1/transcriptions/{}", self.base_url, job_id))
            .bearer_auth(token)
            .send()
            .await
            .expect("status request");
        let status = response.status();
        (status, response.json().await.expect("status body"))
    }

    /// Poll until the job reports `state`, giving up after a few seconds.
    pub async fn wait_for_state(&self, token: &str, job_id: &str, state: &str) -> JobStatusResponse {
        for _ in 0..100 {
            let (_, body) = self.poll(token, job_id).await;
            if body.state == state {
                return body;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached {}", job_id, state);
    }

    /// Id of a registered user.
    pub async fn user_id(&self, username: &str) -> Uuid {
        self.users
            .find_by_username(username)
            .await
            .expect("user lookup")
            .expect("registered user")
            .id
    }

    pub async fn profile_motto(&self, token: &str) -> Option<String> {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/api/v1/user", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .expect("profile request")
            .json()
            .await
            .expect("profile body");
        body["motto"].as_str().map(str::to_string)
    }

    /// Process queued deliveries until the queue is idle.
    pub async fn drain(&self) {
        while self.worker.process_next().await.expect("worker") {}
    }

    /// Every file still present under the upload directory.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut files = Vec::new();
        walk(&self.upload_dir, &mut files);
        files
    }
}
