use aes_gcm::{aead::Aead, Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::{FlexvolError, Result},
    types::SecretValue,
};

use super::envelope::{EncryptedSecretEnvelope, Envelope, SymmetricAlgorithm};

type HmacSha256 = Hmac<Sha256>;

/// Turns an envelope into plaintext with the host private key.
pub trait Decryptor: Send + Sync {
    /// Decrypts one envelope. Failures are terminal for that secret.
    fn decrypt(&self, envelope: &Envelope, key: &RsaPrivateKey) -> Result<SecretValue>;
}

/// Decryptor for both envelope generations.
///
/// Hybrid envelopes unwrap the content key with RSA-OAEP-SHA256, verify the
/// optional HMAC-SHA256 signature over the payload, then open the AES-GCM payload.
/// Legacy envelopes are a single RSA-OAEP-SHA256 ciphertext.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaHybridDecryptor;

impl Decryptor for RsaHybridDecryptor {
    fn decrypt(&self, envelope: &Envelope, key: &RsaPrivateKey) -> Result<SecretValue> {
        match envelope {
            Envelope::Legacy(legacy) => rsa_oaep_decrypt(key, &legacy.ciphertext).map(SecretValue::new),
            Envelope::Hybrid(hybrid) => decrypt_hybrid(hybrid, key),
        }
    }
}

fn decrypt_hybrid(envelope: &EncryptedSecretEnvelope, key: &RsaPrivateKey) -> Result<SecretValue> {
    let content_key = Zeroizing::new(rsa_oaep_decrypt(key, &envelope.wrapped_key.ciphertext)?);
    if content_key.len() != envelope.algorithm.key_length() {
        return Err(FlexvolError::Decrypt(format!(
            "content key is {} bytes, {} requires {}",
            content_key.len(),
            envelope.algorithm.as_str(),
            envelope.algorithm.key_length()
        )));
    }

    if let Some(signature) = &envelope.signature {
        verify_signature(&content_key, &envelope.payload, signature)?;
    }

    let nonce = Nonce::from_slice(envelope.nonce());
    let opened = match envelope.algorithm {
        SymmetricAlgorithm::Aes128Gcm => <Aes128Gcm as KeyInit>::new_from_slice(&content_key)
            .map_err(|_| invalid_content_key())?
            .decrypt(nonce, envelope.sealed()),
        SymmetricAlgorithm::Aes256Gcm => <Aes256Gcm as KeyInit>::new_from_slice(&content_key)
            .map_err(|_| invalid_content_key())?
            .decrypt(nonce, envelope.sealed()),
    };
    opened
        .map(SecretValue::new)
        .map_err(|_| FlexvolError::Decrypt("payload authentication failed".to_owned()))
}

fn verify_signature(content_key: &[u8], payload: &[u8], signature: &[u8]) -> Result<()> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(content_key).map_err(|_| invalid_content_key())?;
    mac.update(payload);
    mac.verify_slice(signature)
        .map_err(|_| FlexvolError::Decrypt("signature does not match ciphertext".to_owned()))
}

fn rsa_oaep_decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|error| FlexvolError::Decrypt(format!("rsa-oaep decryption failed: {error}")))
}

fn invalid_content_key() -> FlexvolError {
    FlexvolError::Decrypt("invalid content key".to_owned())
}
