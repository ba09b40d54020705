//! Vault envelope: the encrypted, metadata-tagged container that is
//! uploaded to cloud storage.
//!
//! Wire format (JSON, field order is part of the format):
//!
//! ```json
//! {"version":1,"encrypted":"<base64>","nonce":"<base64>","tag":"<base64>",
//!  "timestamp":<epoch-ms>,"deviceId":"<string>","hash":"<sha256-hex>"}
//! ```
//!
//! The remote store only ever sees this structure. `hash` is a digest of
//! the plaintext used to short-circuit equality checks between devices;
//! it is never used for authentication (the AEAD tag is).

use crate::cipher::{self, NONCE_SIZE, SealedData, TAG_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// SHA-256 of the plaintext, lowercase hex.
pub fn content_hash(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

/// An immutable sealed vault snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEnvelope {
    version: u32,
    #[serde(rename = "encrypted", with = "b64_vec")]
    ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64_array")]
    tag: [u8; TAG_SIZE],
    timestamp: i64,
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "hash")]
    content_hash: String,
}

impl VaultEnvelope {
    /// Seals `plaintext` into a new envelope.
    ///
    /// `timestamp_ms` is the last-modified time of the local vault in epoch
    /// milliseconds; it drives last-write-wins resolution.
    pub fn seal(
        key: &DerivedKey,
        plaintext: &[u8],
        device_id: impl Into<String>,
        timestamp_ms: i64,
    ) -> CryptoResult<Self> {
        let sealed = cipher::seal(key, plaintext)?;
        Ok(Self {
            version: ENVELOPE_VERSION,
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
            timestamp: timestamp_ms,
            device_id: device_id.into(),
            content_hash: content_hash(plaintext),
        })
    }

    /// Reassembles an envelope from already sealed parts.
    pub fn from_parts(
        sealed: SealedData,
        timestamp_ms: i64,
        device_id: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
            timestamp: timestamp_ms,
            device_id: device_id.into(),
            content_hash: content_hash.into(),
        }
    }

    /// Decrypts the envelope and checks the plaintext against `hash`.
    pub fn open(&self, key: &DerivedKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let plaintext = Zeroizing::new(cipher::open(key, &self.sealed_data())?);
        if content_hash(&plaintext) != self.content_hash {
            return Err(CryptoError::HashMismatch);
        }
        Ok(plaintext)
    }

    /// Serializes to the wire format.
    pub fn to_json(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::InvalidEnvelope(e.to_string()))
    }

    /// Parses the wire format, rejecting unknown versions.
    pub fn from_json(bytes: &[u8]) -> CryptoResult<Self> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidEnvelope(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(envelope.version));
        }
        if envelope.content_hash.len() != 64
            || !envelope.content_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(CryptoError::InvalidEnvelope(
                "hash is not a sha256 hex digest".to_string(),
            ));
        }
        Ok(envelope)
    }

    /// True when both envelopes carry the same plaintext.
    pub fn same_content(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }

    pub fn sealed_data(&self) -> SealedData {
        SealedData {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
            tag: self.tag,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

mod b64_vec {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_array {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {N} bytes, got {len}")))
    }
}
