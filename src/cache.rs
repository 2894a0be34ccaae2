//! Directory-backed cache for large downloaded runtime assets
//! (interpreter/compiler blobs), keyed by runtime id and version so a new
//! session does not re-fetch them. Purely an optimization: nothing depends
//! on a hit for correctness.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use uuid::Uuid;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Stores an asset, replacing any other cached version of the same id.
    pub async fn store(&self, id: &str, version: &str, bytes: &[u8]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).await?;
        self.evict_id(id).await?;

        // Write-then-rename so a crashed session never leaves a torn entry.
        let staging = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, self.entry_path(id, version)).await?;
        Ok(())
    }

    /// Loads an asset if the cached entry matches the requested version.
    pub async fn load(&self, id: &str, version: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.entry_path(id, version)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes entries older than `max_age`; returns how many were evicted.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<usize, CacheError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut evicted = 0;

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let modified = metadata.modified()?;
            if metadata.is_file() && modified < cutoff {
                fs::remove_file(entry.path()).await?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    async fn evict_id(&self, id: &str) -> Result<(), CacheError> {
        let prefix = format!("{}@", sanitize(id));
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    fn entry_path(&self, id: &str, version: &str) -> PathBuf {
        self.dir
            .join(format!("{}@{}.bin", sanitize(id), sanitize(version)))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
            c
        } else {
            '_'
        })
        .collect()
}
