use super::store_file::flatten;
use crate::address::Address;
use crate::crypto;
use crate::descriptor::RootDescriptor;
use crate::error::{Result, StashError};
use crate::manifest::parse_manifest;
use crate::storage::ObjectStore;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

/// Inverts the store pipeline: descriptor, manifest, fetch, decrypt,
/// reassemble.
#[derive(Clone)]
pub struct RetrieveFileOperation {
    store: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone)]
pub struct RetrieveFileOperationRequest {
    /// Raw root descriptor bytes (46-byte file address + encrypted location).
    pub descriptor: Bytes,
    pub chunk_key: Vec<u8>,
    pub metadata_key: Vec<u8>,
    pub destination_dir: PathBuf,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct RetrieveFileOperationResult {
    pub output_path: PathBuf,
    pub chunk_count: u64,
    pub total_bytes: u64,
}

impl RetrieveFileOperation {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Reconstruct the original file under `destination_dir`.
    ///
    /// Chunk fetches fan out up to `max_in_flight` at a time; a single
    /// writer appends decrypted chunks strictly in manifest order. On
    /// failure the destination may be left partially written.
    pub async fn run(
        &self,
        request: RetrieveFileOperationRequest,
    ) -> Result<RetrieveFileOperationResult> {
        let RetrieveFileOperationRequest {
            descriptor,
            chunk_key,
            metadata_key,
            destination_dir,
            max_in_flight,
        } = request;

        crypto::validate_key(&chunk_key)?;
        crypto::validate_key(&metadata_key)?;
        if max_in_flight == 0 {
            return Err(StashError::Config(
                "max_in_flight must be positive".to_string(),
            ));
        }

        let descriptor = RootDescriptor::decode(&descriptor)?;
        let location = descriptor.open_location(&metadata_key)?;
        let file_address = descriptor.file_address();
        let key_prefix = format!("{}{}", location.upload_path, file_address.as_str());

        tracing::info!(
            "Retrieving {} from bucket {}",
            location.file_name,
            location.bucket
        );

        let manifest_key = format!("{}/{}.manifest", key_prefix, file_address.as_str());
        let manifest = self
            .store
            .get(&location.bucket, &manifest_key, 0, None)
            .await?;
        let addresses = parse_manifest(&manifest)?;
        let chunk_count = addresses.len() as u64;

        tokio::fs::create_dir_all(&destination_dir).await?;
        let output_path = destination_dir.join(&location.file_name);
        if tokio::fs::try_exists(&output_path).await? {
            tokio::fs::remove_file(&output_path).await?;
        }

        // Single writer appends decrypted chunks in manifest order,
        // reordering out-of-order completions through an index-keyed buffer.
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<(u64, Vec<u8>)>(max_in_flight);
        let writer_path = output_path.clone();
        let writer = tokio::spawn(async move {
            let mut file = tokio::fs::File::create(&writer_path).await?;
            let mut pending: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
            let mut next_index = 0u64;
            let mut total_bytes = 0u64;

            while let Some((index, data)) = chunk_rx.recv().await {
                pending.insert(index, data);
                while let Some(data) = pending.remove(&next_index) {
                    file.write_all(&data).await?;
                    total_bytes += data.len() as u64;
                    next_index += 1;
                }
            }

            if next_index != chunk_count {
                return Err(StashError::Internal(format!(
                    "writer stopped at chunk {} of {}",
                    next_index, chunk_count
                )));
            }
            file.sync_all().await?;
            Ok::<_, StashError>(total_bytes)
        });

        let chunk_key = Arc::new(chunk_key);
        let semaphore = Arc::new(Semaphore::new(max_in_flight));
        let mut fetches: JoinSet<Result<()>> = JoinSet::new();

        let outcome: Result<()> = async {
            for (index, address) in addresses.iter().enumerate() {
                while let Some(joined) = fetches.try_join_next() {
                    flatten(joined)?;
                }

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| StashError::Internal("fetch semaphore closed".to_string()))?;
                let store = self.store.clone();
                let chunk_key = chunk_key.clone();
                let bucket = location.bucket.clone();
                let key = format!("{}/{}", key_prefix, address.as_str());
                let chunk_tx = chunk_tx.clone();
                let index = index as u64;

                fetches.spawn(async move {
                    let _permit = permit;
                    let ciphertext = store.get(&bucket, &key, 0, None).await?;
                    let data = crypto::decrypt(&chunk_key, &ciphertext)?;
                    tracing::debug!("Fetched chunk {} ({} bytes)", index, data.len());
                    chunk_tx
                        .send((index, data))
                        .await
                        .map_err(|_| StashError::Internal("chunk writer stopped".to_string()))?;
                    Ok(())
                });
            }

            while let Some(joined) = fetches.join_next().await {
                flatten(joined)?;
            }
            Ok(())
        }
        .await;

        if let Err(error) = outcome {
            fetches.abort_all();
            while fetches.join_next().await.is_some() {}
            drop(chunk_tx);
            // The destination may be left partially written; there is no
            // atomic finalize.
            if let Ok(Err(writer_error)) = writer.await {
                tracing::warn!("Writer stopped after fetch failure: {}", writer_error);
            }
            return Err(error);
        }

        drop(chunk_tx);
        let total_bytes = writer
            .await
            .map_err(|error| StashError::Internal(format!("chunk writer failed: {}", error)))??;

        tracing::info!(
            "Retrieved {} chunks ({} bytes) to {:?}",
            chunk_count,
            total_bytes,
            output_path
        );

        Ok(RetrieveFileOperationResult {
            output_path,
            chunk_count,
            total_bytes,
        })
    }
}

/// Resolve a shareable root address to the descriptor bytes stored under it.
pub async fn fetch_root_descriptor(
    store: &dyn ObjectStore,
    bucket: &str,
    upload_path: &str,
    address: &Address,
) -> Result<Bytes> {
    let key = format!("{}{}", upload_path, address.as_str());
    store.get(bucket, &key, 0, None).await
}
