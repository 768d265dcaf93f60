use super::ObjectStore;
use crate::error::{Result, StashError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory-per-bucket filesystem store. A `/` in a key maps to a
/// subdirectory under the bucket directory.
pub struct FsStore {
    base_path: PathBuf,
}

impl FsStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.base_path.join(bucket);
        for part in key.split('/') {
            path.push(part);
        }
        path
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        fs::create_dir_all(self.base_path.join(bucket)).await?;
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let object_path = self.object_path(bucket, key);
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temporary file first, then rename for atomicity. The
        // counter keeps concurrent writers of the same key apart.
        let temp_path =
            object_path.with_extension(format!("tmp{}", TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &object_path).await?;

        tracing::debug!("Stored object {}/{} ({} bytes)", bucket, key, data.len());
        Ok(())
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Bytes> {
        let object_path = self.object_path(bucket, key);
        let mut file = match fs::File::open(&object_path).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StashError::NotFound(format!("{}/{}", bucket, key)));
            }
            Err(error) => return Err(error.into()),
        };

        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }

        let mut data = Vec::new();
        match length {
            Some(length) => {
                file.take(length).read_to_end(&mut data).await?;
            }
            None => {
                file.read_to_end(&mut data).await?;
            }
        }
        Ok(Bytes::from(data))
    }
}
