/*!
Local filesystem storage backend.
*/

use super::StorageBackend;
use crate::{HydrateError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const EXTENSION: &str = "json";

/// Local filesystem storage backend
///
/// Each key is stored as `<base_dir>/<key>.json`. The base directory is
/// created when the backend is opened. Writes land in a temporary file first
/// and are renamed into place, so readers never see a half-written record.
///
/// # Example
/// ```rust,no_run
/// use hydrate_core::storage::{LocalFileBackend, StorageCapability};
///
/// let storage = StorageCapability::shared(LocalFileBackend::new("/var/lib/myapp/state"));
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
    base_dir: PathBuf,
}

impl LocalFileBackend {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the file holding `key`
    ///
    /// Keys are limited to ASCII letters, digits, `_`, `-` and `.` and may not
    /// start with `.`, which keeps every record inside the base directory.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(HydrateError::storage(format!(
                "invalid storage key {key:?}: use letters, digits, '_', '-' or '.'"
            )));
        }
        Ok(self.base_dir.join(format!("{key}.{EXTENSION}")))
    }

    /// List the keys currently stored in the base directory, sorted
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = key_of(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn key_of(path: &Path) -> Option<String> {
    if path.extension()? != EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

#[async_trait]
impl StorageBackend for LocalFileBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn open(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            HydrateError::storage(format!(
                "Failed to create directory {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        let metadata = fs::metadata(&self.base_dir).await?;
        if !metadata.is_dir() {
            return Err(HydrateError::storage(format!(
                "{} is not a directory",
                self.base_dir.display()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HydrateError::storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self
            .base_dir
            .join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));

        fs::write(&tmp, value).await.map_err(|e| {
            HydrateError::storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(HydrateError::storage(format!(
                "Failed to move record into {}: {}",
                path.display(),
                e
            )));
        }

        debug!(key, bytes = value.len(), "Wrote record");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HydrateError::storage(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn clear(&self) -> Result<()> {
        for key in self.keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_backend_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalFileBackend::new(temp_dir.path());
        backend.open().await.unwrap();

        assert_eq!(backend.get("settings").await.unwrap(), None);

        backend.set("settings", r#"{"version":1}"#).await.unwrap();
        assert!(temp_dir.path().join("settings.json").exists());
        assert_eq!(
            backend.get("settings").await.unwrap().as_deref(),
            Some(r#"{"version":1}"#)
        );

        backend.remove("settings").await.unwrap();
        backend.remove("settings").await.unwrap();
        assert_eq!(backend.get("settings").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("a").join("b");
        let backend = LocalFileBackend::new(&base);

        backend.open().await.unwrap();
        assert!(base.is_dir());
    }

    #[tokio::test]
    async fn test_open_fails_when_base_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let backend = LocalFileBackend::new(&file);
        assert!(backend.open().await.is_err());
    }

    #[tokio::test]
    async fn test_keys_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalFileBackend::new(temp_dir.path());
        backend.open().await.unwrap();

        backend.set("b", "2").await.unwrap();
        backend.set("a", "1").await.unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(backend.keys().await.unwrap(), vec!["a", "b"]);

        backend.clear().await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_path_for_rejects_escaping_keys() {
        let backend = LocalFileBackend::new("/tmp/state");
        for key in ["", "../etc", "a/b", ".hidden", "sp ace"] {
            assert!(backend.path_for(key).is_err(), "{key:?} should be rejected");
        }
        assert_eq!(
            backend.path_for("user.prefs-v2").unwrap(),
            PathBuf::from("/tmp/state/user.prefs-v2.json")
        );
    }

    #[tokio::test]
    async fn test_keys_on_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalFileBackend::new(temp_dir.path().join("never-created"));
        assert!(backend.keys().await.unwrap().is_empty());
    }
}
