use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Converts an uploaded recording into the format the transcription API accepts.
///
/// Conversion is deterministic: any error means the input is unusable and
/// the job fails without retry.
#[async_trait]
pub trait AudioConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

/// Runs ffmpeg as a child process to produce MP3.
pub struct FfmpegConverter {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegConverter {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let metadata = tokio::fs::metadata(input)
            .await
            .map_err(|e| ConversionError::Unreadable(e.to_string()))?;
        if metadata.len() == 0 {
            return Err(ConversionError::EmptyInput);
        }

        let child = Command::new(&self.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-f")
            .arg("mp3")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConversionError::Spawn(format!("{}: {}", self.ffmpeg_path, e)))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConversionError::TimedOut(self.timeout))?
            .map_err(|e| ConversionError::Spawn(e.to_string()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ConversionError::Malformed(stderr.trim().to_string()));
        }

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            "Converted audio to mp3"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Audio file is empty")]
    EmptyInput,

    #[error("Audio file could not be read: {0}")]
    Unreadable(String),

    #[error("Audio could not be decoded: {0}")]
    Malformed(String),

    #[error("Failed to run converter {0}")]
    Spawn(String),

    #[error("Audio conversion exceeded {0:?}")]
    TimedOut(Duration),
}
