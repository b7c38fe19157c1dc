//! Envelope decoding and hybrid decryption.

/// Decryption capability and the RSA + AES-GCM implementation.
pub mod decrypt;
/// Envelope wire codec.
pub mod envelope;
/// Host private key loading.
pub mod keys;

pub use decrypt::{Decryptor, RsaHybridDecryptor};
pub use envelope::{EncryptedSecretEnvelope, Envelope, LegacyCiphertext};
pub use keys::load_private_key;
