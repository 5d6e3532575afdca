use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Flat directory of uploaded lesion images, named `{token}_{sanitized original name}`.
#[derive(Clone, Debug)]
pub struct UploadStore {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
    verify_content: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No selected file")]
    NoSelectedFile,
    #[error("File type not allowed")]
    NotAllowed,
    #[error("File content does not match an allowed image type")]
    ContentMismatch,
    #[error("Invalid filename")]
    InvalidName,
    #[error("No such file: {0}")]
    NotFound(String),
    #[error("Retention window {0} is out of range")]
    RetentionOutOfRange(Duration),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reduces an arbitrary client-supplied name to `[A-Za-z0-9_.-]`, werkzeug style:
/// accents are folded (NFKD) before non-ASCII is dropped, separators become spaces,
/// whitespace runs become `_`, leading/trailing `.` and `_` go.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .nfkd()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, allowed_extensions: &[String], verify_content: bool) -> Self {
        Self {
            dir: dir.into(),
            allowed_extensions: allowed_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            verify_content,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn allowed_file(&self, name: &str) -> bool {
        extension_of(name)
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Validates a client filename and produces the unique name it will be stored under.
    pub fn stored_name(&self, original_name: &str) -> Result<String, StorageError> {
        if original_name.is_empty() {
            return Err(StorageError::NoSelectedFile);
        }
        if !self.allowed_file(original_name) {
            return Err(StorageError::NotAllowed);
        }
        let sanitized = secure_filename(original_name);
        if !self.allowed_file(&sanitized) {
            return Err(StorageError::NotAllowed);
        }
        Ok(format!("{}_{}", Uuid::new_v4(), sanitized))
    }

    fn check_content(&self, original_name: &str, data: &[u8]) -> Result<(), StorageError> {
        let declared = extension_of(original_name).ok_or(StorageError::NotAllowed)?;
        let format = image::guess_format(data).map_err(|_| StorageError::ContentMismatch)?;
        if format
            .extensions_str()
            .iter()
            .any(|ext| *ext == declared.as_str())
        {
            Ok(())
        } else {
            Err(StorageError::ContentMismatch)
        }
    }

    pub async fn save(&self, original_name: &str, data: &[u8]) -> Result<String, StorageError> {
        let name = self.stored_name(original_name)?;
        if self.verify_content {
            self.check_content(original_name, data)?;
        }
        tokio::fs::write(self.dir.join(&name), data).await?;
        log::info!("Stored upload {} ({} bytes)", name, data.len());
        Ok(name)
    }

    /// Maps a previously returned name back to its path; only plain file names are accepted.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, StorageError> {
        let is_plain = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\', '\0'])
            && Path::new(filename).file_name().map(|f| f == filename) == Some(true);
        if !is_plain {
            return Err(StorageError::InvalidName);
        }
        Ok(self.dir.join(filename))
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Deletes uploads last modified more than `max_age` ago; returns how many were removed.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .ok_or(StorageError::RetentionOutOfRange(max_age))?;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            if modified < cutoff {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("Failed to remove {}: {}", entry.path().display(), e),
                }
            }
        }
        Ok(removed)
    }
}
