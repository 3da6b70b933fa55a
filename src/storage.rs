use async_trait::async_trait;
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::error::{ApiError, ErrorCode};

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("invalid image source: {0}")]
    InvalidSource(String),
    #[error("other: {0}")]
    Other(String),
}

/// Where an uploaded image is kept. Uploads return the public source URL
/// stored on the owning record; deletes take that URL back.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<String, ImageStoreError>;
    async fn delete(&self, src: &str) -> Result<(), ImageStoreError>;
    /// Source URL an upload under `key` is served from.
    fn public_src(&self, key: &str) -> String;
}

/// Upload destination picked by the client for profile images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    ObjectStorage,
    FileServer,
}

impl std::str::FromStr for UploadTarget {
    type Err = ImageStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "S3" => Ok(UploadTarget::ObjectStorage),
            "FILE_SERVER" => Ok(UploadTarget::FileServer),
            other => Err(ImageStoreError::InvalidSource(format!("unknown upload type '{other}'"))),
        }
    }
}

/// The two stores the service writes to.
#[derive(Clone)]
pub struct ImageStores {
    pub object_storage: Arc<dyn ImageStore>,
    pub file_server: Arc<dyn ImageStore>,
}

impl ImageStores {
    pub fn for_target(&self, target: UploadTarget) -> &Arc<dyn ImageStore> {
        match target {
            UploadTarget::ObjectStorage => &self.object_storage,
            UploadTarget::FileServer => &self.file_server,
        }
    }

    /// Store that issued `src`, judged by its URL prefix.
    pub fn owner_of(&self, src: &str, file_server_base: &str) -> &Arc<dyn ImageStore> {
        if !file_server_base.is_empty() && src.starts_with(file_server_base) {
            &self.file_server
        } else {
            &self.object_storage
        }
    }
}

pub const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// An uploaded image whose type was sniffed from its bytes.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// Hex SHA-256 of `bytes`.
    pub hash: String,
}

impl ImageFile {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ApiError> {
        if bytes.is_empty() || bytes.len() > IMAGE_SIZE_LIMIT {
            return Err(ApiError::Validation(ErrorCode::NotValidFile));
        }
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Err(ApiError::Validation(ErrorCode::UnsupportedMediaType));
        }
        let hash = hex::encode(Sha256::digest(&bytes));
        Ok(Self { bytes, mime, hash })
    }

    pub fn key(&self, prefix: &str) -> String {
        object_key(prefix, &self.hash, &self.mime)
    }
}

/// `images/<first two hex chars>/<key>.<ext>`
pub fn object_key(prefix: &str, hash: &str, mime: &str) -> String {
    let shard = hash.get(0..2).unwrap_or("00");
    let ext = mime.rsplit('/').next().unwrap_or("bin");
    format!("{prefix}/{shard}/{hash}.{ext}")
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    public_base: String,
}

impl S3ImageStore {
    pub async fn new(cfg: &crate::config::S3Config) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()));
        loader = loader.endpoint_url(&cfg.endpoint);
        if !cfg.access_key.is_empty() && !cfg.secret_key.is_empty() {
            let creds = Credentials::new(cfg.access_key.clone(), cfg.secret_key.clone(), None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing; most MinIO/local endpoints lack wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO client for bucket '{}'", cfg.bucket);

        let bucket = cfg.bucket.clone();
        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) if attempt >= max_attempts => {
                        error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                        return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                    }
                    Err(e2) => {
                        let backoff_ms = 200 * attempt.pow(2); // quadratic backoff
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        let public_base = format!("{}/{}", cfg.endpoint.trim_end_matches('/'), bucket);
        Ok(Self { bucket, client, public_base })
    }

    fn key_from_src<'a>(&self, src: &'a str) -> Result<&'a str, ImageStoreError> {
        src.strip_prefix(self.public_base.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ImageStoreError::InvalidSource(src.to_string()))
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn upload(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<String, ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!("put_object failed key={key} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(ImageStoreError::Other(format!("{e}{hint}")));
        }
        Ok(self.public_src(key))
    }

    fn public_src(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    async fn delete(&self, src: &str) -> Result<(), ImageStoreError> {
        let key = self.key_from_src(src)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        Ok(())
    }
}

// ---------------- File server (mounted directory) ----------------

/// Images written beneath `root` and served by a separate file server at
/// `public_base`, e.g. `https://files.example.com`.
pub struct FsImageStore {
    root: PathBuf,
    public_base: String,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self { root: root.into(), public_base: public_base.into().trim_end_matches('/').to_string() }
    }

    /// Resolves a source URL to its file, refusing anything that escapes `root`.
    fn path_for_src(&self, src: &str) -> Result<PathBuf, ImageStoreError> {
        let rel = src
            .strip_prefix(self.public_base.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| ImageStoreError::InvalidSource(src.to_string()))?;
        let rel = Path::new(rel);
        let depth = rel.components().count();
        if depth < 3 || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ImageStoreError::InvalidSource(src.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn upload(&self, key: &str, _mime: &str, bytes: &[u8]) -> Result<String, ImageStoreError> {
        let src = self.public_src(key);
        let path = self.path_for_src(&src)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("file server write failed path={}: {e}", path.display());
            ImageStoreError::Other(e.to_string())
        })?;
        Ok(src)
    }

    async fn delete(&self, src: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for_src(src)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ImageStoreError::NotFound),
            Err(e) => Err(ImageStoreError::Other(e.to_string())),
        }
    }

    fn public_src(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}
