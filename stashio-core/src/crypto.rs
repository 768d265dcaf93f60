//! Chunk cipher: AES-CFB with a random IV over base64-encoded plaintext.
//!
//! Wire format is `IV(16) || cfb(base64(plaintext))`. The base64 pass and
//! full-block CFB feedback match the stored-data format of existing backups,
//! so both must stay exactly as they are.

use crate::error::{Result, StashError};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cfb_mode::cipher::{AsyncStreamCipher, InvalidLength, KeyIvInit};
use cfb_mode::{Decryptor, Encryptor};
use rand::RngCore;
use rand::rngs::OsRng;

/// AES block length; also the IV length prepended to every ciphertext.
pub const CIPHER_BLOCK_LEN: usize = 16;

/// Key length picks the AES variant, like Go's `aes.NewCipher`.
pub fn validate_key(key: &[u8]) -> Result<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        other => Err(StashError::Crypto(format!(
            "invalid key length {}: expected 16, 24 or 32 bytes",
            other
        ))),
    }
}

pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; CIPHER_BLOCK_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut body = BASE64.encode(plaintext).into_bytes();
    cfb_apply(key, &iv, &mut body, Mode::Encrypt)?;

    let mut ciphertext = Vec::with_capacity(CIPHER_BLOCK_LEN + body.len());
    ciphertext.extend_from_slice(&iv);
    ciphertext.extend_from_slice(&body);
    Ok(ciphertext)
}

pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < CIPHER_BLOCK_LEN {
        return Err(StashError::Crypto(
            "ciphertext shorter than one cipher block".to_string(),
        ));
    }

    let (iv, rest) = ciphertext.split_at(CIPHER_BLOCK_LEN);
    let mut body = rest.to_vec();
    cfb_apply(key, iv, &mut body, Mode::Decrypt)?;

    BASE64
        .decode(&body)
        .map_err(|error| StashError::Crypto(format!("invalid base64 in ciphertext: {}", error)))
}

#[derive(Clone, Copy)]
enum Mode {
    Encrypt,
    Decrypt,
}

fn cfb_apply(key: &[u8], iv: &[u8], buf: &mut [u8], mode: Mode) -> Result<()> {
    match (key.len(), mode) {
        (16, Mode::Encrypt) => Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(init_error)?
            .encrypt(buf),
        (16, Mode::Decrypt) => Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(init_error)?
            .decrypt(buf),
        (24, Mode::Encrypt) => Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(init_error)?
            .encrypt(buf),
        (24, Mode::Decrypt) => Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(init_error)?
            .decrypt(buf),
        (32, Mode::Encrypt) => Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(init_error)?
            .encrypt(buf),
        (32, Mode::Decrypt) => Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(init_error)?
            .decrypt(buf),
        (other, _) => {
            return Err(StashError::Crypto(format!(
                "invalid key length {}: expected 16, 24 or 32 bytes",
                other
            )));
        }
    }
    Ok(())
}

fn init_error(error: InvalidLength) -> StashError {
    StashError::Crypto(format!("cipher init failed: {}", error))
}
