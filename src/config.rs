//! Engine configuration, resolved once at startup from CLI flags and
//! environment variables into a single explicit record. No functional-options
//! threading: flags are parsed into plain fields up front (see `cli.rs`), and
//! everything downstream takes a `&Config` rather than loose parameters.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub bearer_token: Option<String>,
    pub query_splitting: bool,
    pub log_level: String,
    pub storage: StorageConfig,
    /// Local filesystem root for every table's `log/log.db`. DuckDB has no
    /// writable remote catalog-file story, so the log database is always
    /// local even when `storage` is S3-backed (see DESIGN.md).
    pub log_root: String,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Filesystem { root: String },
    S3 {
        bucket: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        region: String,
        endpoint: Option<String>,
        path_style: bool,
        public_url_prefix: Option<String>,
    },
}

impl Default for Config {
    fn default() -> Self {
        let storage = StorageConfig::from_env();
        let log_root = match &storage {
            StorageConfig::Filesystem { root } => root.clone(),
            StorageConfig::S3 { .. } => {
                env::var("ICEBASE_LOG_ROOT").unwrap_or_else(|_| "icebase_logs".to_string())
            }
        };
        Config {
            http_port: 8080,
            bearer_token: env::var("BEARER_TOKEN").ok().filter(|s| !s.is_empty()),
            query_splitting: false,
            log_level: "info".to_string(),
            storage,
            log_root,
        }
    }
}

impl StorageConfig {
    /// Resolve the storage backend from environment variables, per the
    /// engine's documented `S3_*` / filesystem-default contract.
    pub fn from_env() -> Self {
        match env::var("S3_BUCKET").ok().filter(|s| !s.is_empty()) {
            Some(bucket) => StorageConfig::S3 {
                bucket,
                access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
                region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: env::var("S3_ENDPOINT").ok(),
                path_style: env::var("S3_USE_PATH_STYLE")
                    .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                    .unwrap_or(false),
                public_url_prefix: env::var("S3_PUBLIC_URL_PREFIX").ok(),
            },
            None => StorageConfig::Filesystem {
                root: env::var("ICEBASE_DB_FOLDER").unwrap_or_else(|_| "icebase_tables".to_string()),
            },
        }
    }
}
