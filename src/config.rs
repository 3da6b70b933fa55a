use std::path::PathBuf;
use std::time::Duration;

use crate::pagination::PagingConfig;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{0} must be at least 32 characters long")]
    WeakSecret(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct FileServerConfig {
    pub root: PathBuf,
    pub public_base: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub paging: PagingConfig,
    pub header_cache_ttl: Duration,
    pub file_server: FileServerConfig,
    /// `None` when `S3_ENDPOINT` is unset; object-storage uploads are then
    /// written through the file server.
    pub s3: Option<S3Config>,
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Reads the process environment. `JWT_SECRET` is required; everything
    /// else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < 32 {
            return Err(ConfigError::WeakSecret("JWT_SECRET"));
        }

        let paging = PagingConfig {
            default_page_size: parsed("COMMENT_PAGE_SIZE", 10)?,
            max_page_size: parsed("COMMENT_MAX_PAGE_SIZE", 50)?,
            block_size: parsed("COMMENT_PAGE_BLOCK", 10)?,
        };
        if paging.default_page_size == 0 || paging.max_page_size == 0 || paging.block_size == 0 {
            return Err(ConfigError::Invalid { name: "COMMENT_PAGE_*", value: "0".into() });
        }

        let s3 = var("S3_ENDPOINT").map(|endpoint| S3Config {
            bucket: var("S3_BUCKET").unwrap_or_else(|| "freeblog-images".into()),
            endpoint,
            region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            access_key: var("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: var("S3_SECRET_KEY").unwrap_or_default(),
        });

        Ok(Self {
            host: var("FREEBLOG_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("FREEBLOG_PORT", 8080)?,
            frontend_url: var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".into()),
            paging,
            header_cache_ttl: Duration::from_secs(parsed("USER_HEADER_CACHE_TTL", 600)?),
            file_server: FileServerConfig {
                root: var("FILE_SERVER_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data/files")),
                public_base: var("FILE_SERVER_BASE_URL").unwrap_or_else(|| "http://localhost:8081".into()),
            },
            s3,
            database_url: var("DATABASE_URL"),
            data_dir: var("FREEBLOG_DATA_DIR").map(PathBuf::from),
        })
    }
}
