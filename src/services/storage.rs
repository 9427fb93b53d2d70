use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "webm";

/// Temporary storage area for uploaded audio and its converted intermediates.
///
/// Files live under `<root>/<user_id>/audio_<user_id>_<unix_millis>_<nonce>.<ext>`.
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(StorageError::Io)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an upload for `user_id`, returning its path.
    pub async fn save(
        &self,
        user_id: Uuid,
        original_filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(user_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let nonce = &Uuid::new_v4().simple().to_string()[..8];
        let filename = format!(
            "audio_{}_{}_{}.{}",
            user_id,
            Utc::now().timestamp_millis(),
            nonce,
            upload_extension(original_filename)
        );
        let path = dir.join(filename);
        tokio::fs::write(&path, data).await?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "Stored upload");
        Ok(path)
    }

    /// Where the converted copy of `original` is written.
    pub fn converted_path(original: &Path) -> PathBuf {
        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        original.with_file_name(format!("{stem}.converted.mp3"))
    }

    /// Delete one file. Returns `false` if it was already gone.
    pub async fn remove(&self, path: &Path) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Delete the upload and its converted intermediate. Failures are logged,
    /// the janitor picks up whatever is left.
    pub async fn remove_artifacts(&self, original: &Path) {
        let converted = Self::converted_path(original);
        for path in [original, converted.as_path()] {
            if let Err(e) = self.remove(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete audio artifact");
            }
        }
    }

    /// Delete uploads last modified more than `ttl` ago.
    pub async fn reclaim_older_than(&self, ttl: Duration) -> Result<usize, StorageError> {
        let cutoff = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut reclaimed = 0;

        let mut users = tokio::fs::read_dir(&self.root).await?;
        while let Some(user_dir) = users.next_entry().await? {
            if !user_dir.file_type().await?.is_dir() {
                continue;
            }

            let mut files = tokio::fs::read_dir(user_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let metadata = file.metadata().await?;
                if !metadata.is_file() {
                    continue;
                }
                let modified = metadata.modified().unwrap_or(SystemTime::now());
                if modified <= cutoff && self.remove(&file.path()).await? {
                    reclaimed += 1;
                }
            }
        }

        if reclaimed > 0 {
            tracing::info!(reclaimed, "Reclaimed abandoned uploads");
        }
        Ok(reclaimed)
    }
}

/// Keep a short alphanumeric extension from the client filename.
fn upload_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
