//! Envelope encryption for GenPwd vault sync.
//!
//! Zero-knowledge by construction: a vault is sealed on the device and the
//! cloud provider only ever stores the resulting [`VaultEnvelope`].
//!
//! - Argon2id (64 MiB, 3 iterations, parallelism 1) derives a 256-bit key
//!   from the master password and a per-vault random salt.
//! - AES-256-GCM seals the serialized vault with a fresh 96-bit nonce per
//!   call and a detached 128-bit tag.
//! - A SHA-256 content hash travels with the envelope so two devices can
//!   tell identical vaults apart without decrypting.
//!
//! Key material is wiped on drop ([`DerivedKey`]) and decrypted plaintext is
//! handed out as [`zeroize::Zeroizing`] buffers.

mod cipher;
pub mod envelope;
mod error;
mod key;

pub use cipher::{NONCE_SIZE, SealedData, TAG_SIZE, open, seal};
pub use envelope::{ENVELOPE_VERSION, VaultEnvelope, content_hash};
pub use error::{CryptoError, CryptoResult};
pub use key::{DerivedKey, KEY_SIZE, KdfParams, SALT_SIZE, Salt, derive_key, generate_random_key};
pub use zeroize::Zeroizing;
