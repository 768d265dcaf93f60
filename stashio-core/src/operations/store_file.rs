use crate::address::{Address, ContentAddresser};
use crate::crypto;
use crate::descriptor::{LocationMetadata, RootDescriptor};
use crate::error::{Result, StashError};
use crate::manifest::{AppendLog, ManifestBuilder};
use crate::split::Splitter;
use crate::storage::ObjectStore;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

/// Drives the whole store pipeline: split, address, encrypt, upload,
/// manifest, root descriptor.
#[derive(Clone)]
pub struct StoreFileOperation {
    addresser: Arc<dyn ContentAddresser>,
    store: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone)]
pub struct StoreFileOperationRequest {
    pub source_path: PathBuf,
    pub block_size: usize,
    pub bucket: String,
    /// Normalized upload path: empty, or ending in `/`.
    pub upload_path: String,
    pub chunk_key: Vec<u8>,
    pub metadata_key: Vec<u8>,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct StoreFileOperationResult {
    /// Content address of the root descriptor blob: the shareable token.
    pub root_address: Address,
    pub file_address: Address,
    pub chunk_count: u64,
    pub total_bytes: u64,
}

impl StoreFileOperation {
    pub fn new(addresser: Arc<dyn ContentAddresser>, store: Arc<dyn ObjectStore>) -> Self {
        Self { addresser, store }
    }

    /// Store one file and return the shareable root address.
    ///
    /// Chunk uploads fan out up to `max_in_flight` at a time; completions
    /// report to a single collector that owns the manifest. Any failure
    /// fails the whole operation; chunks uploaded before the failure are
    /// left in place.
    pub async fn run<L>(
        &self,
        request: StoreFileOperationRequest,
        manifest_log: L,
    ) -> Result<StoreFileOperationResult>
    where
        L: AppendLog + 'static,
    {
        let StoreFileOperationRequest {
            source_path,
            block_size,
            bucket,
            upload_path,
            chunk_key,
            metadata_key,
            max_in_flight,
        } = request;

        crypto::validate_key(&chunk_key)?;
        crypto::validate_key(&metadata_key)?;
        if max_in_flight == 0 {
            return Err(StashError::Config(
                "max_in_flight must be positive".to_string(),
            ));
        }

        let file_name = source_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StashError::Config(format!("source path {:?} has no file name", source_path))
            })?
            .to_string();

        self.store.ensure_bucket(&bucket).await?;

        let file_address = self.addresser.identify_file(&source_path).await?;
        tracing::info!("Storing {} under base address {}", file_name, file_address);

        let file = tokio::fs::File::open(&source_path).await?;
        let mut splitter = Splitter::new(BufReader::new(file), block_size)?;

        // Single owner of the manifest: uploads report (index, address) as
        // soon as their chunk is durably stored.
        let (report_tx, mut report_rx) = mpsc::channel::<(u64, Address)>(max_in_flight);
        let collector = tokio::spawn(async move {
            let mut builder = ManifestBuilder::start(manifest_log).await?;
            while let Some((index, address)) = report_rx.recv().await {
                builder.record(index, address).await?;
            }
            Ok::<_, StashError>(builder)
        });

        let key_prefix = format!("{}{}", upload_path, file_address.as_str());
        let chunk_key = Arc::new(chunk_key);
        let semaphore = Arc::new(Semaphore::new(max_in_flight));
        let mut uploads: JoinSet<Result<()>> = JoinSet::new();
        let mut chunk_count = 0u64;
        let mut total_bytes = 0u64;

        let outcome: Result<()> = async {
            loop {
                // Drain completed uploads so a failure aborts the read loop
                // without consuming the rest of the source.
                while let Some(joined) = uploads.try_join_next() {
                    flatten(joined)?;
                }

                let Some(block) = splitter.next_block().await? else {
                    break;
                };
                let index = chunk_count;
                chunk_count += 1;
                total_bytes += block.len() as u64;

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| StashError::Internal("upload semaphore closed".to_string()))?;
                let addresser = self.addresser.clone();
                let store = self.store.clone();
                let chunk_key = chunk_key.clone();
                let bucket = bucket.clone();
                let key_prefix = key_prefix.clone();
                let report_tx = report_tx.clone();

                uploads.spawn(async move {
                    let _permit = permit;
                    let address = addresser.identify(block.clone()).await?;
                    let ciphertext = crypto::encrypt(&chunk_key, &block)?;
                    let key = format!("{}/{}", key_prefix, address.as_str());
                    store.put(&bucket, &key, Bytes::from(ciphertext)).await?;
                    tracing::debug!("Uploaded chunk {} as {}", index, address);
                    report_tx
                        .send((index, address))
                        .await
                        .map_err(|_| StashError::Internal("manifest collector stopped".to_string()))?;
                    Ok(())
                });
            }

            while let Some(joined) = uploads.join_next().await {
                flatten(joined)?;
            }
            Ok(())
        }
        .await;

        if let Err(error) = outcome {
            uploads.abort_all();
            while uploads.join_next().await.is_some() {}
            drop(report_tx);
            // When the collector stopped first, its failure is the root
            // cause; otherwise report the upload failure.
            if let Ok(Err(collector_error)) = collector.await {
                return Err(collector_error);
            }
            return Err(error);
        }

        drop(report_tx);
        let builder = collector
            .await
            .map_err(|error| StashError::Internal(format!("manifest collector failed: {}", error)))??;
        let manifest = builder.finalize().await?;

        let manifest_key = format!("{}/{}.manifest", key_prefix, file_address.as_str());
        self.store
            .put(&bucket, &manifest_key, Bytes::from(manifest))
            .await?;

        let location = LocationMetadata {
            bucket: bucket.clone(),
            upload_path: upload_path.clone(),
            file_name,
        };
        let descriptor = RootDescriptor::seal(file_address.clone(), &location, &metadata_key)?;
        let descriptor_bytes = descriptor.encode();

        let root_address = self
            .addresser
            .identify(Bytes::from(descriptor_bytes.clone()))
            .await?;
        let root_key = format!("{}{}", upload_path, root_address.as_str());
        self.store
            .put(&bucket, &root_key, Bytes::from(descriptor_bytes))
            .await?;

        tracing::info!(
            "Stored {} chunks ({} bytes); shareable address {}",
            chunk_count,
            total_bytes,
            root_address
        );

        Ok(StoreFileOperationResult {
            root_address,
            file_address,
            chunk_count,
            total_bytes,
        })
    }
}

pub(crate) fn flatten(
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(join_error) if join_error.is_cancelled() => Ok(()),
        Err(join_error) => Err(StashError::Internal(format!(
            "worker task panicked: {}",
            join_error
        ))),
    }
}
