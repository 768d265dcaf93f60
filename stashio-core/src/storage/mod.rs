//! Storage backends for Stashio
//!
//! Bucket-scoped key/value blob storage behind the `ObjectStore` trait.

pub mod fs_store;
pub mod s3_store;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use fs_store::FsStore;
pub use s3_store::S3Store;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Make sure the bucket exists and is reachable.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// Durably store a blob under `bucket`/`key`.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;

    /// Fetch a blob, optionally restricted to `length` bytes starting at
    /// `offset`.
    async fn get(&self, bucket: &str, key: &str, offset: u64, length: Option<u64>)
    -> Result<Bytes>;
}
