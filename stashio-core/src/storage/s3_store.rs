use super::ObjectStore;
use crate::config::S3Settings;
use crate::error::{Result, StashError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use object_store::ObjectStore as _;
use object_store::PutPayload;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// S3 (or S3-compatible) backend built on the `object_store` crate.
///
/// Bucket handles are built lazily from the configured credentials and
/// cached per bucket.
pub struct S3Store {
    settings: S3Settings,
    buckets: Mutex<HashMap<String, Arc<dyn object_store::ObjectStore>>>,
}

impl S3Store {
    pub fn new(settings: S3Settings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn bucket_handle(&self, bucket: &str) -> Result<Arc<dyn object_store::ObjectStore>> {
        let mut buckets = self.buckets.lock().await;
        if let Some(handle) = buckets.get(bucket) {
            return Ok(handle.clone());
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.settings.region)
            .with_access_key_id(&self.settings.access_key_id)
            .with_secret_access_key(&self.settings.secret_access_key);
        if let Some(endpoint) = &self.settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(self.settings.allow_http);
        }

        let handle: Arc<dyn object_store::ObjectStore> = Arc::new(
            builder
                .build()
                .map_err(|error| StashError::Config(format!("invalid S3 settings: {}", error)))?,
        );
        buckets.insert(bucket.to_string(), handle.clone());
        Ok(handle)
    }
}

fn map_store_error(bucket: &str, key: &str, error: object_store::Error) -> StashError {
    match error {
        object_store::Error::NotFound { .. } => {
            StashError::NotFound(format!("{}/{}", bucket, key))
        }
        other => StashError::Store(format!("{}/{}: {}", bucket, key, other)),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let handle = self.bucket_handle(bucket).await?;

        // This client cannot create buckets; probe with a one-entry list so
        // a missing or unreachable bucket surfaces before the first upload.
        let mut listing = handle.list(None);
        match listing.next().await {
            None | Some(Ok(_)) => Ok(()),
            Some(Err(error)) => Err(StashError::Connectivity(format!(
                "bucket {} not reachable: {}",
                bucket, error
            ))),
        }
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let handle = self.bucket_handle(bucket).await?;
        let path = StorePath::from(key);
        handle
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|error| map_store_error(bucket, key, error))?;

        tracing::debug!("Stored object {}/{}", bucket, key);
        Ok(())
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Bytes> {
        let handle = self.bucket_handle(bucket).await?;
        let path = StorePath::from(key);

        match length {
            Some(length) => {
                let range = (offset as usize)..((offset + length) as usize);
                handle
                    .get_range(&path, range)
                    .await
                    .map_err(|error| map_store_error(bucket, key, error))
            }
            None => {
                let result = handle
                    .get(&path)
                    .await
                    .map_err(|error| map_store_error(bucket, key, error))?;
                let data = result
                    .bytes()
                    .await
                    .map_err(|error| map_store_error(bucket, key, error))?;
                if offset > 0 {
                    let start = (offset as usize).min(data.len());
                    Ok(data.slice(start..))
                } else {
                    Ok(data)
                }
            }
        }
    }
}
