//! Stashio Core - chunked, encrypted file backup to object storage
//!
//! Stores a file as a sequence of fixed-size blocks:
//! - content addressing per block (CIDv0, local or via an IPFS daemon)
//! - AES-CFB encryption per block with a random IV
//! - bucket-scoped blob storage backends (filesystem, S3)
//! - a crash-resilient chunk manifest per file
//! - one shareable root address that permits exact reconstruction

pub mod address;
pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod manifest;
pub mod operations;
pub mod split;
pub mod storage;

pub use address::{ADDRESS_LEN, Address, Cidv0Addresser, ContentAddresser, IpfsAddresser};
pub use config::{
    AddressingBackend, AddressingConfig, Config, FsStoreConfig, IpfsConfig, KeysConfig,
    RetrieveConfig, S3Settings, SourceConfig, StoreBackend, StoreConfig,
};
pub use descriptor::{LocationMetadata, RootDescriptor};
pub use error::{Result, StashError};
pub use factory::{build_addresser, build_store};
pub use manifest::{
    AppendLog, FileAppendLog, MANIFEST_SEPARATOR, ManifestBuilder, parse_manifest,
};
pub use operations::{
    RetrieveFileOperation, RetrieveFileOperationRequest, RetrieveFileOperationResult,
    StoreFileOperation, StoreFileOperationRequest, StoreFileOperationResult,
    fetch_root_descriptor,
};
pub use split::Splitter;
pub use storage::{FsStore, ObjectStore, S3Store};
