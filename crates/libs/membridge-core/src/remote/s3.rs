//! S3-compatible object store client.
//!
//! Targets MinIO and friends: custom endpoint, path-style addressing,
//! signature v4, region configurable with `us-east-1` as the default.

use super::{ObjectMeta, ObjectStore, RemoteError};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the object store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

/// Object store backed by an S3-compatible service.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(cfg: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "membridge",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(cfg.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: cfg.bucket.clone(),
        }
    }

    /// Reachability probe used by the doctor: head the configured bucket.
    pub async fn head_bucket(&self) -> Result<(), RemoteError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify_sdk_error(e, &self.bucket))
    }
}

/// Map an SDK error to the three-way classification callers rely on.
fn classify_sdk_error<E>(err: SdkError<E>, key: &str) -> RemoteError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(ctx) => {
            let raw = ctx.raw();
            if raw.status().as_u16() == 404 {
                RemoteError::NotFound { key: key.to_string() }
            } else {
                RemoteError::Server(format!("{key}: {err}"))
            }
        }
        _ => RemoteError::Transport(format!("{key}: {err}")),
    }
}

impl ObjectStore for S3ObjectStore {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::Transport(format!("{key}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn put_bytes(&self, key: &str, body: Vec<u8>) -> Result<(), RemoteError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify_sdk_error(e, key))
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, RemoteError> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        let size = resp.content_length().unwrap_or(0).max(0) as u64;
        Ok(ObjectMeta { size })
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<u64, RemoteError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;

        let mut body = resp.body;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| RemoteError::Transport(format!("create {}: {e}", dest.display())))?;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| RemoteError::Transport(format!("{key}: {e}")))?
        {
            written += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| RemoteError::Transport(format!("write {}: {e}", dest.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| RemoteError::Transport(format!("flush {}: {e}", dest.display())))?;
        Ok(written)
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<u64, RemoteError> {
        let size = tokio::fs::metadata(src)
            .await
            .map_err(|e| RemoteError::Transport(format!("stat {}: {e}", src.display())))?
            .len();
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| RemoteError::Transport(format!("open {}: {e}", src.display())))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        Ok(size)
    }
}
