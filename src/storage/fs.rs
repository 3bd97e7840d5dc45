//! Filesystem-backed `Storage`. Used when `S3_BUCKET` is unset (the default).
//!
//! The ETag is MD5 of the current content — sufficient for compare-and-swap
//! within a single host, per spec.md §4.1. Missing intermediate directories
//! are created on demand.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

use super::{Stat, Storage, WriteOptions};

#[derive(Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

fn etag_of(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl FilesystemStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> EngineResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn read(&self, path: &str) -> EngineResult<(Vec<u8>, Stat)> {
        let full = self.resolve(path);
        let bytes = tokio::fs::read(&full).await?;
        let meta = tokio::fs::metadata(&full).await?;
        let mtime_unix_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let stat = Stat { size: meta.len(), mtime_unix_ms, etag: etag_of(&bytes) };
        Ok((bytes, stat))
    }

    async fn write(&self, path: &str, bytes: Vec<u8>, opts: WriteOptions) -> EngineResult<()> {
        let full = self.resolve(path);
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        if let Some(expected) = &opts.if_match {
            match tokio::fs::read(&full).await {
                Ok(current) => {
                    if &etag_of(&current) != expected {
                        return Err(EngineError::precondition_failed(format!(
                            "if_match mismatch for {}",
                            path
                        )));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(EngineError::precondition_failed(format!(
                        "if_match set but {} does not exist",
                        path
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Write-then-rename keeps a concurrent reader from ever observing a
        // partially-written file.
        let file_name = full.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let tmp = full.with_file_name(format!("{}.tmp-{}", file_name, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &full).await?;
        debug!(target: "icebase::storage", "wrote {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    async fn stat(&self, path: &str) -> EngineResult<Stat> {
        let (_, stat) = self.read(path).await?;
        Ok(stat)
    }

    async fn delete(&self, path: &str) -> EngineResult<()> {
        let full = self.resolve(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(&entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                out.push(rel);
            }
        }
        Ok(out)
    }

    async fn create_dir(&self, path: &str) -> EngineResult<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }

    fn write_path(&self, path: &str) -> String {
        self.resolve(path).to_string_lossy().into_owned()
    }

    fn read_path(&self, path: &str) -> String {
        self.write_path(path)
    }

    fn engine_secret(&self, _name: &str) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_missing_intermediate_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path()).unwrap();
        store
            .write("t/data/deep/x.parquet", b"hi".to_vec(), WriteOptions::default())
            .await
            .unwrap();
        let (body, _) = store.read("t/data/deep/x.parquet").await.unwrap();
        assert_eq!(body, b"hi");
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path()).unwrap();
        let err = store.read("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
