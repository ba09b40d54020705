//! AES-256-GCM sealing with a detached tag.
//!
//! - 256-bit key
//! - 96-bit nonce, fresh from the OS CSPRNG on every call
//! - 128-bit authentication tag, stored separately from the ciphertext

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};

/// Nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of [`seal`]: ciphertext with its nonce and detached tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedData {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

/// Encrypts `plaintext` under `key` with a freshly generated nonce.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<SealedData> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut combined = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    if combined.len() < TAG_SIZE {
        return Err(CryptoError::Encryption(
            "ciphertext shorter than tag".to_string(),
        ));
    }
    let tag_start = combined.len() - TAG_SIZE;
    let tag: [u8; TAG_SIZE] = combined[tag_start..]
        .try_into()
        .map_err(|_| CryptoError::Encryption("invalid tag length".to_string()))?;
    combined.truncate(tag_start);

    Ok(SealedData {
        ciphertext: combined,
        nonce: nonce.into(),
        tag,
    })
}

/// Decrypts and verifies sealed data.
///
/// Verification and decryption are one step: on a tag mismatch nothing
/// is returned and the error is [`CryptoError::Integrity`].
pub fn open(key: &DerivedKey, sealed: &SealedData) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(sealed.nonce);

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(&nonce, combined.as_slice())
        .map_err(|_| CryptoError::Integrity)
}
