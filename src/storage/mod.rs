//! C1 — Storage backend.
//!
//! A uniform byte-level interface over a local filesystem and an
//! S3-compatible object store, with conditional (compare-and-swap) writes
//! and the path translation the embedded analytical engine needs to read
//! and write Parquet files directly.

mod fs;
mod s3;

pub use fs::FilesystemStorage;
pub use s3::S3Storage;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::EngineResult;

/// Metadata returned alongside a read, and by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub mtime_unix_ms: i64,
    pub etag: String,
}

/// Options for a conditional write. `if_match` mirrors HTTP's `If-Match`:
/// when set, the write only succeeds if the object's current ETag equals it.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub if_match: Option<String>,
}

/// Byte-level storage capability. Implementations MUST treat `delete` of an
/// absent object as success, and MUST return `list` paths relative to the
/// storage root.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> EngineResult<(Vec<u8>, Stat)>;
    async fn write(&self, path: &str, bytes: Vec<u8>, opts: WriteOptions) -> EngineResult<()>;
    async fn stat(&self, path: &str) -> EngineResult<Stat>;
    async fn delete(&self, path: &str) -> EngineResult<()>;
    async fn list(&self, prefix: &str) -> EngineResult<Vec<String>>;
    async fn create_dir(&self, path: &str) -> EngineResult<()>;

    /// A URI the analytical engine can `COPY ... TO` directly.
    fn write_path(&self, path: &str) -> String;
    /// A URI the analytical engine can `read_parquet(...)` directly. May be a
    /// public HTTPS URL when one is configured, to let reads bypass the
    /// signed/authenticated endpoint.
    fn read_path(&self, path: &str) -> String;
    /// A DDL fragment registering credentials with the analytical engine, or
    /// the empty string when the backend needs none (filesystem).
    fn engine_secret(&self, name: &str) -> String;
}

/// Construct the configured backend: filesystem by default, S3-compatible
/// object store when `S3_BUCKET` (via `StorageConfig::S3`) is set (spec.md §6).
pub fn build(cfg: &StorageConfig) -> EngineResult<Arc<dyn Storage>> {
    match cfg {
        StorageConfig::Filesystem { root } => Ok(Arc::new(FilesystemStorage::new(root)?) as Arc<dyn Storage>),
        StorageConfig::S3 { .. } => Ok(Arc::new(S3Storage::new(cfg)?) as Arc<dyn Storage>),
    }
}

#[cfg(test)]
mod contract_tests {
    use super::*;
    use tempfile::tempdir;

    /// Invariant 6 (spec §8): conditional write correctness, against the
    /// filesystem backend. The S3 backend delegates If-Match to the object
    /// store crate's own conformant implementation and is not re-tested here.
    #[tokio::test]
    async fn conditional_write_correctness() {
        let dir = tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path()).unwrap();

        store.write("p", b"a".to_vec(), WriteOptions::default()).await.unwrap();
        let etag_a = store.stat("p").await.unwrap().etag;

        // Matching etag succeeds.
        store
            .write("p", b"b".to_vec(), WriteOptions { if_match: Some(etag_a.clone()) })
            .await
            .unwrap();
        let (body, _) = store.read("p").await.unwrap();
        assert_eq!(body, b"b");

        // Stale etag fails and leaves content untouched.
        let err = store
            .write("p", b"c".to_vec(), WriteOptions { if_match: Some("stale".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::PreconditionFailed { .. }));
        let (body, _) = store.read("p").await.unwrap();
        assert_eq!(body, b"b");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path()).unwrap();
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_root_relative_paths() {
        let dir = tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path()).unwrap();
        store.write("t/data/a.parquet", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        store.write("t/data/b.parquet", b"y".to_vec(), WriteOptions::default()).await.unwrap();

        let mut names = store.list("t/data").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["t/data/a.parquet", "t/data/b.parquet"]);
    }

    #[test]
    fn build_selects_filesystem_backend_by_default() {
        let dir = tempdir().unwrap();
        let cfg = StorageConfig::Filesystem { root: dir.path().to_string_lossy().into_owned() };
        assert!(build(&cfg).is_ok());
    }
}
