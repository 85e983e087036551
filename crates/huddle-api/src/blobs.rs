//! Attachment storage. Messages only ever hold a content key; the URL is
//! resolved when the message is read.

use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

/// Stored bytes plus the MIME type they were uploaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their content key.
    async fn put(&self, bytes: &[u8], mime_type: &str) -> Result<String>;

    async fn get(&self, content_key: &str) -> Result<Option<Blob>>;

    /// Where a client can fetch the blob.
    fn resolve_url(&self, content_key: &str) -> String;
}

/// Content-addressed blob store on the local filesystem. The key is the
/// SHA-256 of the bytes, so uploading the same file twice is a no-op.
pub struct DiskBlobStore {
    dir: PathBuf,
    public_url: String,
}

impl DiskBlobStore {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into(),
        })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn type_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.type"))
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        let key = content_key(bytes);
        fs::write(self.data_path(&key), bytes).await?;
        fs::write(self.type_path(&key), mime_type).await?;
        Ok(key)
    }

    async fn get(&self, content_key: &str) -> Result<Option<Blob>> {
        if !is_valid_key(content_key) {
            bail!("invalid content key");
        }

        let bytes = match fs::read(self.data_path(content_key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mime_type = fs::read_to_string(self.type_path(content_key))
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        Ok(Some(Blob { bytes, mime_type }))
    }

    fn resolve_url(&self, content_key: &str) -> String {
        format!("{}/files/{}", self.public_url, content_key)
    }
}

/// Hex SHA-256 of the bytes.
pub fn content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Keys are exactly 64 lowercase hex digits; anything else could escape the
/// storage directory.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
