use crate::error::{Result, StashError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Length of the printable form of a content address.
pub const ADDRESS_LEN: usize = 46;

/// Tag every valid address starts with (CIDv0).
pub const ADDRESS_TAG: &str = "Qm";

/// Validated content address: 46 base58 characters beginning with `Qm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != ADDRESS_LEN || !value.starts_with(ADDRESS_TAG) {
            return Err(StashError::InvalidAddress(value.to_string()));
        }
        if !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(StashError::InvalidAddress(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic, content-only addressing. Addressing never persists data;
/// storage is the object store's job.
#[async_trait]
pub trait ContentAddresser: Send + Sync {
    /// Compute the content address of a byte blob.
    async fn identify(&self, data: Bytes) -> Result<Address>;

    /// Compute the content address of a whole file.
    async fn identify_file(&self, path: &Path) -> Result<Address> {
        let data = tokio::fs::read(path).await?;
        self.identify(Bytes::from(data)).await
    }
}

const MULTIHASH_SHA256: u8 = 0x12;
const MULTIHASH_SHA256_LEN: u8 = 0x20;

/// In-process addresser computing CIDv0: base58 of the SHA-256 multihash.
#[derive(Debug, Clone, Default)]
pub struct Cidv0Addresser;

impl Cidv0Addresser {
    pub fn new() -> Self {
        Self
    }

    fn encode_digest(digest: &[u8]) -> Result<Address> {
        let mut multihash = Vec::with_capacity(2 + digest.len());
        multihash.push(MULTIHASH_SHA256);
        multihash.push(MULTIHASH_SHA256_LEN);
        multihash.extend_from_slice(digest);
        Address::parse(&bs58::encode(multihash).into_string())
    }
}

#[async_trait]
impl ContentAddresser for Cidv0Addresser {
    async fn identify(&self, data: Bytes) -> Result<Address> {
        Self::encode_digest(Sha256::digest(&data).as_slice())
    }

    async fn identify_file(&self, path: &Path) -> Result<Address> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Self::encode_digest(hasher.finalize().as_slice())
    }
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Addresser backed by an IPFS daemon's HTTP API, hash-only mode.
pub struct IpfsAddresser {
    api_url: String,
    client: reqwest::Client,
}

impl IpfsAddresser {
    /// Connect to the daemon and verify it responds before first use.
    pub async fn connect(api_url: &str) -> Result<Self> {
        let api_url = api_url.trim().trim_end_matches('/');
        if api_url.is_empty() {
            return Err(StashError::Config(
                "IPFS api url cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| StashError::Internal(format!("http client init failed: {}", error)))?;

        let addresser = Self {
            api_url: api_url.to_string(),
            client,
        };
        addresser.probe_version().await?;
        Ok(addresser)
    }

    async fn probe_version(&self) -> Result<()> {
        let url = format!("{}/api/v0/version", self.api_url);
        let response = self.client.post(&url).send().await.map_err(|error| {
            StashError::Connectivity(format!(
                "IPFS daemon unreachable at {}: {}",
                self.api_url, error
            ))
        })?;

        if !response.status().is_success() {
            return Err(StashError::Connectivity(format!(
                "IPFS version probe failed: status={}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ContentAddresser for IpfsAddresser {
    async fn identify(&self, data: Bytes) -> Result<Address> {
        let url = format!(
            "{}/api/v0/add?only-hash=true&cid-version=0",
            self.api_url
        );
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("data");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|error| StashError::Connectivity(format!("IPFS add failed: {}", error)))?;

        if !response.status().is_success() {
            return Err(StashError::Connectivity(format!(
                "IPFS add failed: status={}",
                response.status()
            )));
        }

        let payload: AddResponse = response
            .json()
            .await
            .map_err(|error| StashError::Internal(format!("invalid IPFS add response: {}", error)))?;

        Address::parse(&payload.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_identify_shape() {
        let addresser = Cidv0Addresser::new();
        let address = addresser.identify(Bytes::from("hello world")).await.unwrap();
        assert_eq!(address.as_str().len(), ADDRESS_LEN);
        assert!(address.as_str().starts_with(ADDRESS_TAG));
    }

    #[tokio::test]
    async fn test_identify_deterministic() {
        let addresser = Cidv0Addresser::new();
        let a = addresser.identify(Bytes::from("same input")).await.unwrap();
        let b = addresser.identify(Bytes::from("same input")).await.unwrap();
        let c = addresser.identify(Bytes::from("other input")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_identify_file_matches_identify() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("data.bin");
        let content = vec![7u8; 200_000];
        let mut file = tokio::fs::File::create(&path).await.unwrap();
        file.write_all(&content).await.unwrap();
        file.sync_all().await.unwrap();

        let addresser = Cidv0Addresser::new();
        let from_file = addresser.identify_file(&path).await.unwrap();
        let from_bytes = addresser.identify(Bytes::from(content)).await.unwrap();
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn test_address_parse_rejects_malformed() {
        assert!(Address::parse("Qmshort").is_err());
        assert!(Address::parse(&"a".repeat(ADDRESS_LEN)).is_err());
        let mut spaced = String::from("Qm");
        spaced.push_str(&" ".repeat(ADDRESS_LEN - 2));
        assert!(Address::parse(&spaced).is_err());
    }

    #[tokio::test]
    async fn test_address_parse_accepts_computed() {
        let addresser = Cidv0Addresser::new();
        let address = addresser.identify(Bytes::from("round trip")).await.unwrap();
        let reparsed = Address::parse(address.as_str()).unwrap();
        assert_eq!(address, reparsed);
    }
}
