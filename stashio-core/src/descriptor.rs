//! Root descriptor: the single shareable token behind a stored file.
//!
//! Wire format is the raw 46-byte file address followed by the encrypted
//! location metadata (`IV(16) || cfb(base64("bucket,path,filename"))`).
//! The descriptor is stored as its own blob and its content address is what
//! callers share.

use crate::address::{ADDRESS_LEN, Address};
use crate::crypto;
use crate::error::{Result, StashError};

/// Separator between location metadata fields.
pub const FIELD_SEPARATOR: char = ',';

/// Where a stored file's blobs live: bucket, upload-path prefix, and the
/// original file name. Persisted only in encrypted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationMetadata {
    pub bucket: String,
    pub upload_path: String,
    pub file_name: String,
}

impl LocationMetadata {
    /// `bucket,path,filename`. Fields are not escaped: a separator inside a
    /// field corrupts parsing.
    pub fn serialize(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.bucket,
            self.upload_path,
            self.file_name,
            sep = FIELD_SEPARATOR
        )
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        if fields.len() != 3 {
            return Err(StashError::InvalidDescriptor(format!(
                "location metadata has {} fields, expected 3",
                fields.len()
            )));
        }

        Ok(Self {
            bucket: fields[0].to_string(),
            upload_path: fields[1].to_string(),
            file_name: fields[2].to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RootDescriptor {
    file_address: Address,
    sealed_location: Vec<u8>,
}

impl RootDescriptor {
    /// Encrypt `location` with the metadata key and bind it to `file_address`.
    pub fn seal(
        file_address: Address,
        location: &LocationMetadata,
        metadata_key: &[u8],
    ) -> Result<Self> {
        let sealed_location = crypto::encrypt(metadata_key, location.serialize().as_bytes())?;
        Ok(Self {
            file_address,
            sealed_location,
        })
    }

    /// Split descriptor bytes into the 46-byte address head and the
    /// encrypted location tail.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() <= ADDRESS_LEN {
            return Err(StashError::InvalidDescriptor(format!(
                "descriptor is {} bytes, expected more than {}",
                data.len(),
                ADDRESS_LEN
            )));
        }

        let (head, tail) = data.split_at(ADDRESS_LEN);
        let text = std::str::from_utf8(head).map_err(|_| {
            StashError::InvalidDescriptor("address head is not valid UTF-8".to_string())
        })?;

        Ok(Self {
            file_address: Address::parse(text)?,
            sealed_location: tail.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(ADDRESS_LEN + self.sealed_location.len());
        data.extend_from_slice(self.file_address.as_bytes());
        data.extend_from_slice(&self.sealed_location);
        data
    }

    pub fn file_address(&self) -> &Address {
        &self.file_address
    }

    /// Decrypt the location metadata with the metadata key.
    pub fn open_location(&self, metadata_key: &[u8]) -> Result<LocationMetadata> {
        let plaintext = crypto::decrypt(metadata_key, &self.sealed_location)?;
        let text = String::from_utf8(plaintext).map_err(|_| {
            StashError::InvalidDescriptor("location metadata is not valid UTF-8".to_string())
        })?;
        LocationMetadata::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Cidv0Addresser, ContentAddresser};
    use bytes::Bytes;

    const METADATA_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    async fn file_address() -> Address {
        Cidv0Addresser::new()
            .identify(Bytes::from("descriptor test file"))
            .await
            .unwrap()
    }

    fn location() -> LocationMetadata {
        LocationMetadata {
            bucket: "backups".to_string(),
            upload_path: "nightly/".to_string(),
            file_name: "accounts.db".to_string(),
        }
    }

    #[test]
    fn test_metadata_serialize_parse_round_trip() {
        let original = location();
        let serialized = original.serialize();
        assert_eq!(serialized, "backups,nightly/,accounts.db");
        assert_eq!(LocationMetadata::parse(&serialized).unwrap(), original);
    }

    #[test]
    fn test_metadata_separator_in_field_corrupts_parse() {
        // Known limitation: fields are not escaped.
        let broken = LocationMetadata {
            bucket: "backups".to_string(),
            upload_path: "a,b/".to_string(),
            file_name: "f".to_string(),
        };
        let result = LocationMetadata::parse(&broken.serialize());
        assert!(matches!(result, Err(StashError::InvalidDescriptor(_))));
    }

    #[tokio::test]
    async fn test_seal_encode_decode_open() {
        let address = file_address().await;
        let descriptor = RootDescriptor::seal(address.clone(), &location(), METADATA_KEY).unwrap();

        let encoded = descriptor.encode();
        assert_eq!(&encoded[..ADDRESS_LEN], address.as_bytes());

        let decoded = RootDescriptor::decode(&encoded).unwrap();
        assert_eq!(decoded.file_address(), &address);
        assert_eq!(decoded.open_location(METADATA_KEY).unwrap(), location());
    }

    #[tokio::test]
    async fn test_open_with_wrong_key_fails() {
        let descriptor =
            RootDescriptor::seal(file_address().await, &location(), METADATA_KEY).unwrap();
        let decoded = RootDescriptor::decode(&descriptor.encode()).unwrap();
        assert!(
            decoded
                .open_location(b"ffffffffffffffffffffffffffffffff")
                .is_err()
        );
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(matches!(
            RootDescriptor::decode(&[0u8; ADDRESS_LEN]),
            Err(StashError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            RootDescriptor::decode(b"Qm"),
            Err(StashError::InvalidDescriptor(_))
        ));
    }

    #[tokio::test]
    async fn test_sealed_location_never_clear() {
        let descriptor =
            RootDescriptor::seal(file_address().await, &location(), METADATA_KEY).unwrap();
        let encoded = descriptor.encode();
        let tail = &encoded[ADDRESS_LEN..];

        let clear = location().serialize();
        assert!(!tail.windows(clear.len()).any(|w| w == clear.as_bytes()));
    }
}
