use crate::error::{Result, StashError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: Option<SourceConfig>,
    pub addressing: AddressingConfig,
    pub store: StoreConfig,
    pub keys: KeysConfig,
    #[serde(default)]
    pub retrieve: Option<RetrieveConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub block_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressingConfig {
    pub backend: AddressingBackend,
    #[serde(default)]
    pub ipfs: Option<IpfsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingBackend {
    Local,
    Ipfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub bucket: String,
    #[serde(default)]
    pub upload_path: String,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub fs: Option<FsStoreConfig>,
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

fn default_max_in_flight() -> usize {
    4
}

impl StoreConfig {
    /// Upload path in standard form: empty, or ending in exactly one `/`.
    pub fn normalized_upload_path(&self) -> String {
        normalize_upload_path(&self.upload_path)
    }
}

pub fn normalize_upload_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return String::new();
    }
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Fs,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsStoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub allow_http: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    pub chunk_key: String,
    pub metadata_key: String,
}

impl KeysConfig {
    pub fn chunk_key_bytes(&self) -> Vec<u8> {
        self.chunk_key.clone().into_bytes()
    }

    pub fn metadata_key_bytes(&self) -> Vec<u8> {
        self.metadata_key.clone().into_bytes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveConfig {
    pub destination: PathBuf,
    #[serde(default)]
    pub token: Option<String>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("STASHIO"))
            .build()
            .map_err(|e| StashError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| StashError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stashio.json");
        let payload = serde_json::json!({
            "source": { "path": "/data/accounts.db", "block_size": 40000 },
            "addressing": { "backend": "local" },
            "store": {
                "backend": "fs",
                "bucket": "backups",
                "upload_path": "nightly",
                "fs": { "root": "/var/lib/stashio" }
            },
            "keys": {
                "chunk_key": "0123456789abcdef0123456789abcdef",
                "metadata_key": "fedcba9876543210fedcba9876543210"
            }
        });
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(payload.to_string().as_bytes()).unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        let source = config.source.unwrap();
        assert_eq!(source.block_size, 40000);
        assert!(matches!(config.store.backend, StoreBackend::Fs));
        assert_eq!(config.store.max_in_flight, 4);
        assert_eq!(config.store.normalized_upload_path(), "nightly/");
        assert_eq!(config.keys.chunk_key_bytes().len(), 32);
        assert!(config.retrieve.is_none());
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/does/not/exist/stashio.json");
        assert!(matches!(result, Err(StashError::Config(_))));
    }

    #[test]
    fn test_normalize_upload_path() {
        assert_eq!(normalize_upload_path(""), "");
        assert_eq!(normalize_upload_path("/"), "");
        assert_eq!(normalize_upload_path("nightly"), "nightly/");
        assert_eq!(normalize_upload_path("nightly/"), "nightly/");
        assert_eq!(normalize_upload_path("a/b"), "a/b/");
    }
}
