//! Batch persistence: one pretty-printed JSON file per batch.
//!
//! Files are named `batch_<id>.json` and hold the [`BatchInfo`] file form
//! (camelCase keys, workpiece ids under `workpieces`). Import and export use
//! the same form.

use std::path::{Path, PathBuf};

use spray_core::batch::BatchInfo;

use crate::error::BatchError;

const FILE_PREFIX: &str = "batch_";
const FILE_SUFFIX: &str = ".json";

/// Directory holding one file per batch.
#[derive(Debug, Clone)]
pub struct BatchFileStore {
    dir: PathBuf,
}

impl BatchFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, batch_id: &str) -> Result<PathBuf, BatchError> {
        ensure_safe_id(batch_id)?;
        Ok(self.dir.join(format!("{FILE_PREFIX}{batch_id}{FILE_SUFFIX}")))
    }

    /// Write (or replace) the batch's file, creating the directory if needed.
    pub async fn save(&self, batch: &BatchInfo) -> Result<PathBuf, BatchError> {
        let path = self.path_for(&batch.batch_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| BatchError::Io {
                path: self.dir.clone(),
                source,
            })?;
        write_batch_file(&path, batch).await?;
        Ok(path)
    }

    /// Delete the batch's file. A file that is already gone is not an error.
    pub async fn remove(&self, batch_id: &str) -> Result<(), BatchError> {
        let path = self.path_for(batch_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BatchError::Io { path, source }),
        }
    }

    /// Every batch file in the directory, oldest first. Unreadable files are
    /// logged and skipped; a missing directory yields nothing.
    pub async fn load_all(&self) -> Result<Vec<BatchInfo>, BatchError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BatchError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut batches = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| BatchError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else {
                break;
            };
            let path = entry.path();
            if !is_batch_file(&path) {
                continue;
            }
            match read_batch_file(&path).await {
                Ok(batch) => batches.push(batch),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable batch file"),
            }
        }
        batches.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(batches)
    }
}

pub async fn read_batch_file(path: &Path) -> Result<BatchInfo, BatchError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let batch: BatchInfo = serde_json::from_slice(&bytes).map_err(|source| BatchError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    ensure_safe_id(&batch.batch_id)?;
    Ok(batch)
}

/// Write through a temporary sibling and rename, so readers never see a
/// half-written file.
pub async fn write_batch_file(path: &Path, batch: &BatchInfo) -> Result<(), BatchError> {
    let json = serde_json::to_vec_pretty(batch).map_err(|source| BatchError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source: std::io::Error| BatchError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
}

fn is_batch_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
}

fn ensure_safe_id(batch_id: &str) -> Result<(), BatchError> {
    let safe = !batch_id.is_empty()
        && batch_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        Ok(())
    } else {
        Err(BatchError::InvalidId(batch_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn file_names_follow_batch_prefix() {
        let store = BatchFileStore::new("/data/batches");
        let path = store.path_for("3f2c-aa").expect("safe id");
        assert_eq!(path, PathBuf::from("/data/batches/batch_3f2c-aa.json"));
        assert!(is_batch_file(&path));
        assert!(!is_batch_file(Path::new("/data/batches/batch_3f2c-aa.json.tmp")));
        assert!(!is_batch_file(Path::new("/data/batches/notes.json")));
    }

    #[test]
    fn path_traversal_ids_are_rejected() {
        let store = BatchFileStore::new("/data/batches");
        assert_matches!(store.path_for("../etc/passwd"), Err(BatchError::InvalidId(_)));
        assert_matches!(store.path_for(""), Err(BatchError::InvalidId(_)));
        assert_matches!(store.path_for("a/b"), Err(BatchError::InvalidId(_)));
    }

    #[tokio::test]
    async fn save_load_and_remove() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = BatchFileStore::new(dir.path().join("batches"));
        let mut batch = BatchInfo::new("Line 2", "night shift");
        batch.add(7);
        batch.add(9);

        let path = store.save(&batch).await.expect("save");
        assert!(path.exists());
        let loaded = store.load_all().await.expect("load");
        assert_eq!(loaded, vec![batch.clone()]);

        store.remove(&batch.batch_id).await.expect("remove");
        store.remove(&batch.batch_id).await.expect("second remove is a no-op");
        assert!(store.load_all().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn malformed_files_are_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = BatchFileStore::new(dir.path());
        tokio::fs::write(dir.path().join("batch_broken.json"), b"{ not json")
            .await
            .expect("write");
        let good = BatchInfo::new("Good", "");
        store.save(&good).await.expect("save");

        let loaded = store.load_all().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].batch_name, "Good");
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = BatchFileStore::new(dir.path().join("never-created"));
        assert!(store.load_all().await.expect("load").is_empty());
    }
}
