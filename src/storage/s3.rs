//! S3-compatible `Storage`, backed by the `object_store` crate. Selected when
//! `S3_BUCKET` is set. Conditional writes use the backend's own ETag
//! (for single-part uploads this is the object's MD5, per spec.md §4.1) via
//! `PutMode::Update`.

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};

use crate::config::StorageConfig;
use crate::error::{EngineError, EngineResult};

use super::{Stat, Storage, WriteOptions};

pub struct S3Storage {
    bucket: String,
    public_url_prefix: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    region: String,
    endpoint: Option<String>,
    path_style: bool,
    store: Box<dyn ObjectStore>,
}

impl S3Storage {
    pub fn new(cfg: &StorageConfig) -> EngineResult<Self> {
        let StorageConfig::S3 {
            bucket,
            access_key_id,
            secret_access_key,
            region,
            endpoint,
            path_style,
            public_url_prefix,
        } = cfg
        else {
            return Err(EngineError::internal("S3Storage::new called with non-S3 config"));
        };

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region)
            .with_virtual_hosted_style_request(!path_style);
        if let Some(k) = access_key_id {
            builder = builder.with_access_key_id(k);
        }
        if let Some(s) = secret_access_key {
            builder = builder.with_secret_access_key(s);
        }
        if let Some(e) = endpoint {
            builder = builder.with_endpoint(e).with_allow_http(e.starts_with("http://"));
        }
        let store = builder.build().map_err(|e| EngineError::io(e.to_string()))?;

        Ok(Self {
            bucket: bucket.clone(),
            public_url_prefix: public_url_prefix.clone(),
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            region: region.clone(),
            endpoint: endpoint.clone(),
            path_style: *path_style,
            store: Box::new(store),
        })
    }

    fn object_meta_to_stat(meta: &object_store::ObjectMeta) -> Stat {
        Stat {
            size: meta.size as u64,
            mtime_unix_ms: meta.last_modified.timestamp_millis(),
            etag: meta.e_tag.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn read(&self, path: &str) -> EngineResult<(Vec<u8>, Stat)> {
        let p = ObjectPath::from(path);
        let result = self.store.get(&p).await?;
        let meta = result.meta.clone();
        let bytes = result.bytes().await?;
        Ok((bytes.to_vec(), Self::object_meta_to_stat(&meta)))
    }

    async fn write(&self, path: &str, bytes: Vec<u8>, opts: WriteOptions) -> EngineResult<()> {
        let p = ObjectPath::from(path);
        let payload = PutPayload::from(bytes);
        let mode = match opts.if_match {
            Some(etag) => PutMode::Update(UpdateVersion { e_tag: Some(etag), version: None }),
            None => PutMode::Overwrite,
        };
        self.store
            .put_opts(&p, payload, PutOptions { mode, ..Default::default() })
            .await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> EngineResult<Stat> {
        let meta = self.store.head(&ObjectPath::from(path)).await?;
        Ok(Self::object_meta_to_stat(&meta))
    }

    async fn delete(&self, path: &str) -> EngineResult<()> {
        match self.store.delete(&ObjectPath::from(path)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let p = if prefix.is_empty() { None } else { Some(ObjectPath::from(prefix)) };
        let metas: Vec<object_store::ObjectMeta> = self.store.list(p.as_ref()).try_collect().await?;
        Ok(metas.into_iter().map(|m| m.location.to_string()).collect())
    }

    async fn create_dir(&self, _path: &str) -> EngineResult<()> {
        // no-op on object stores, per spec.md §4.1
        Ok(())
    }

    fn write_path(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, path)
    }

    fn read_path(&self, path: &str) -> String {
        match &self.public_url_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path),
            None => self.write_path(path),
        }
    }

    fn engine_secret(&self, name: &str) -> String {
        let url_style = if self.path_style { "path" } else { "vhost" };
        format!(
            "CREATE OR REPLACE SECRET {name} (\n    TYPE S3,\n    KEY_ID '{key}',\n    SECRET '{secret}',\n    REGION '{region}',\n    URL_STYLE '{url_style}'{endpoint}\n);",
            name = name,
            key = self.access_key_id.clone().unwrap_or_default(),
            secret = self.secret_access_key.clone().unwrap_or_default(),
            region = self.region,
            url_style = url_style,
            endpoint = self
                .endpoint
                .as_ref()
                .map(|e| format!(",\n    ENDPOINT '{}'", e.trim_start_matches("https://").trim_start_matches("http://")))
                .unwrap_or_default(),
        )
    }
}
