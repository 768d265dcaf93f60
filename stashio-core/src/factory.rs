//! Builds the pipeline's collaborators from configuration.

use crate::address::{Cidv0Addresser, ContentAddresser, IpfsAddresser};
use crate::config::{AddressingBackend, AddressingConfig, StoreBackend, StoreConfig};
use crate::error::{Result, StashError};
use crate::storage::{FsStore, ObjectStore, S3Store};
use std::sync::Arc;

pub async fn build_addresser(config: &AddressingConfig) -> Result<Arc<dyn ContentAddresser>> {
    match config.backend {
        AddressingBackend::Local => Ok(Arc::new(Cidv0Addresser::new())),
        AddressingBackend::Ipfs => {
            let ipfs = config.ipfs.as_ref().ok_or_else(|| {
                StashError::Config(
                    "ipfs configuration is required for the ipfs addressing backend".to_string(),
                )
            })?;
            let addresser = IpfsAddresser::connect(&ipfs.api_url).await?;
            Ok(Arc::new(addresser))
        }
    }
}

pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StoreBackend::Fs => {
            let fs = config.fs.as_ref().ok_or_else(|| {
                StashError::Config("fs configuration is required for the fs store backend".to_string())
            })?;
            Ok(Arc::new(FsStore::new(fs.root.clone())?))
        }
        StoreBackend::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                StashError::Config("s3 configuration is required for the s3 store backend".to_string())
            })?;
            Ok(Arc::new(S3Store::new(s3.clone())))
        }
    }
}
