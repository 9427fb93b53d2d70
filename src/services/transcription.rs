use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// External speech-to-text service.
///
/// Every error from an implementation is treated as transient by the worker.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError>;

    fn name(&self) -> &str;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for the OpenAI-compatible `/v1/audio/transcriptions` endpoint.
pub struct WhisperClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl WhisperClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TranscriptionError::Http)?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/audio/transcriptions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let audio = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let file_part = multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(TranscriptionError::Http)?;
        let form = multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(TranscriptionError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(TranscriptionError::Http)?;
        if !status.is_success() {
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&body)?;
        Ok(parsed.text)
    }

    fn name(&self) -> &str {
        "whisper"
    }
}

/// Stand-in used when no API key is configured.
pub struct MockTranscriber {
    delay: Duration,
}

impl MockTranscriber {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        tokio::time::sleep(self.delay).await;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("This is a mock transcription of the audio file: {file_name}"))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("Transcription request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transcription service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse transcription response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read converted audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transcription timed out after {0:?}")]
    Timeout(Duration),
}
