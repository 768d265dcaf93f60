//! Chunk manifest: the ordered list of chunk addresses for one file.
//!
//! During a store the manifest is built through an injectable append-only
//! log so that after a crash the log holds exactly the addresses of chunks
//! already durably uploaded, never more. Serialized form is the addresses
//! joined by [`MANIFEST_SEPARATOR`] with one trailing separator and no line
//! breaks.

use crate::address::{ADDRESS_LEN, Address};
use crate::error::{Result, StashError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Separator between addresses in the serialized manifest.
pub const MANIFEST_SEPARATOR: char = ',';

/// Durable append-only byte log holding in-progress manifest state.
#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Append bytes; the write is durable before this returns.
    async fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Everything appended so far.
    async fn contents(&self) -> Result<Vec<u8>>;

    /// Drop all state.
    async fn remove(&mut self) -> Result<()>;
}

/// Append-only log backed by a local file, synced on every append.
pub struct FileAppendLog {
    path: PathBuf,
}

impl FileAppendLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AppendLog for FileAppendLog {
    async fn append(&mut self, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn contents(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path).await {
            Ok(data) => Ok(data),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove(&mut self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Builds a manifest from per-chunk completion reports.
///
/// Insertion is index-keyed, so chunks may report in any completion order;
/// the log is only ever appended in production order, one address at a time,
/// as the completed prefix grows.
pub struct ManifestBuilder<L: AppendLog> {
    log: L,
    pending: BTreeMap<u64, Address>,
    next_index: u64,
}

impl<L: AppendLog> ManifestBuilder<L> {
    /// Start with a fresh log, discarding any state left by a crashed run.
    pub async fn start(mut log: L) -> Result<Self> {
        log.remove().await?;
        Ok(Self {
            log,
            pending: BTreeMap::new(),
            next_index: 0,
        })
    }

    /// Number of addresses durably recorded so far.
    pub fn recorded(&self) -> u64 {
        self.next_index
    }

    /// Record the address of the chunk at `index`.
    pub async fn record(&mut self, index: u64, address: Address) -> Result<()> {
        if index < self.next_index || self.pending.contains_key(&index) {
            return Err(StashError::Internal(format!(
                "duplicate manifest index {}",
                index
            )));
        }

        self.pending.insert(index, address);
        while let Some(address) = self.pending.remove(&self.next_index) {
            let mut entry = String::with_capacity(ADDRESS_LEN + 1);
            entry.push_str(address.as_str());
            entry.push(MANIFEST_SEPARATOR);
            self.log.append(entry.as_bytes()).await?;
            self.next_index += 1;
        }
        Ok(())
    }

    /// Serialize the finished manifest and remove the transient log.
    pub async fn finalize(mut self) -> Result<Vec<u8>> {
        if let Some(first_pending) = self.pending.keys().next() {
            return Err(StashError::Internal(format!(
                "manifest missing chunk {} while chunk {} is already recorded",
                self.next_index, first_pending
            )));
        }

        let serialized = self.log.contents().await?;
        self.log.remove().await?;
        Ok(serialized)
    }
}

/// Parse a serialized manifest back into its ordered address list.
pub fn parse_manifest(data: &[u8]) -> Result<Vec<Address>> {
    let text = std::str::from_utf8(data)
        .map_err(|error| StashError::InvalidManifest(format!("not valid UTF-8: {}", error)))?;

    let trimmed = text.strip_suffix(MANIFEST_SEPARATOR).unwrap_or(text);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split(MANIFEST_SEPARATOR)
        .map(|entry| {
            Address::parse(entry)
                .map_err(|_| StashError::InvalidManifest(format!("invalid entry: {:?}", entry)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ContentAddresser;
    use crate::address::Cidv0Addresser;
    use bytes::Bytes;

    async fn test_address(tag: u8) -> Address {
        Cidv0Addresser::new()
            .identify(Bytes::from(vec![tag; 8]))
            .await
            .unwrap()
    }

    fn temp_log(dir: &tempfile::TempDir) -> FileAppendLog {
        FileAppendLog::new(dir.path().join("manifest.partial"))
    }

    #[tokio::test]
    async fn test_in_order_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ManifestBuilder::start(temp_log(&dir)).await.unwrap();

        let a = test_address(1).await;
        let b = test_address(2).await;
        builder.record(0, a.clone()).await.unwrap();
        builder.record(1, b.clone()).await.unwrap();
        assert_eq!(builder.recorded(), 2);

        let serialized = builder.finalize().await.unwrap();
        let expected = format!("{},{},", a, b);
        assert_eq!(serialized, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_out_of_order_recording_keeps_production_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ManifestBuilder::start(temp_log(&dir)).await.unwrap();

        let addresses = [
            test_address(1).await,
            test_address(2).await,
            test_address(3).await,
        ];
        builder.record(2, addresses[2].clone()).await.unwrap();
        assert_eq!(builder.recorded(), 0);
        builder.record(0, addresses[0].clone()).await.unwrap();
        assert_eq!(builder.recorded(), 1);
        builder.record(1, addresses[1].clone()).await.unwrap();
        assert_eq!(builder.recorded(), 3);

        let serialized = builder.finalize().await.unwrap();
        let parsed = parse_manifest(&serialized).unwrap();
        assert_eq!(parsed, addresses);
    }

    #[tokio::test]
    async fn test_log_holds_only_completed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let log = temp_log(&dir);
        let log_path = log.path().to_path_buf();
        let mut builder = ManifestBuilder::start(log).await.unwrap();

        let a = test_address(1).await;
        let c = test_address(3).await;
        builder.record(0, a.clone()).await.unwrap();
        builder.record(2, c).await.unwrap();

        // Chunk 1 never completed: the durable log must stop after chunk 0.
        let on_disk = tokio::fs::read(&log_path).await.unwrap();
        assert_eq!(on_disk, format!("{},", a).as_bytes());

        let result = builder.finalize().await;
        assert!(matches!(result, Err(StashError::Internal(_))));
    }

    #[tokio::test]
    async fn test_duplicate_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ManifestBuilder::start(temp_log(&dir)).await.unwrap();

        let a = test_address(1).await;
        builder.record(0, a.clone()).await.unwrap();
        let result = builder.record(0, a).await;
        assert!(matches!(result, Err(StashError::Internal(_))));
    }

    #[tokio::test]
    async fn test_start_discards_stale_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut stale = temp_log(&dir);
        stale.append(b"leftover-from-a-crashed-run,").await.unwrap();

        let builder = ManifestBuilder::start(temp_log(&dir)).await.unwrap();
        let serialized = builder.finalize().await.unwrap();
        assert!(serialized.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = temp_log(&dir);
        let log_path = log.path().to_path_buf();

        let mut builder = ManifestBuilder::start(log).await.unwrap();
        builder.record(0, test_address(9).await).await.unwrap();
        builder.finalize().await.unwrap();

        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn test_parse_round_trip_and_edges() {
        let a = test_address(4).await;
        let b = test_address(5).await;

        let text = format!("{},{},", a, b);
        assert_eq!(parse_manifest(text.as_bytes()).unwrap(), vec![a, b]);

        assert!(parse_manifest(b"").unwrap().is_empty());
        assert!(parse_manifest(b"not-an-address,").is_err());
        assert!(parse_manifest(&[0xff, 0xfe]).is_err());
    }
}
