//! Wire codec for secret envelopes.
//!
//! Two generations share the wire: the hybrid form is base64 of a JSON document
//! carrying an AES-GCM payload plus an RSA-wrapped content key, the legacy form
//! is base64 of a bare RSA-OAEP ciphertext. Neither carries a version marker, so
//! the shape is probed: a decoded payload that is UTF-8 text opening with `{` is
//! parsed as JSON, anything else is a legacy ciphertext.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{FlexvolError, Result};

/// Nonce length of the AES-GCM payload.
pub const NONCE_LENGTH: usize = 12;
/// Authentication tag length of the AES-GCM payload.
pub const TAG_LENGTH: usize = 16;

/// Symmetric cipher protecting the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetricAlgorithm {
    /// AES-128 in GCM mode.
    Aes128Gcm,
    /// AES-256 in GCM mode.
    Aes256Gcm,
}

impl SymmetricAlgorithm {
    /// Wire identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "AES128_GCM",
            Self::Aes256Gcm => "AES256_GCM",
        }
    }

    /// Expected content key length in bytes.
    pub fn key_length(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm => 32,
        }
    }

    fn from_wire(raw: &str) -> Result<Self> {
        match normalize_identifier(raw).as_str() {
            "AES128GCM" => Ok(Self::Aes128Gcm),
            "AES256GCM" | "AES256GCM96" => Ok(Self::Aes256Gcm),
            _ => Err(FlexvolError::Decode(format!(
                "unsupported symmetric algorithm `{raw}`"
            ))),
        }
    }
}

/// Asymmetric primitive wrapping the content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsymmetricAlgorithm {
    /// RSA with OAEP padding over SHA-256.
    RsaOaepSha256,
}

impl AsymmetricAlgorithm {
    /// Wire identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RsaOaepSha256 => "RSA_OAEP_SHA256",
        }
    }

    fn from_wire(raw: &str) -> Result<Self> {
        match normalize_identifier(raw).as_str() {
            "RSAOAEPSHA256" | "RSAOAEP" | "RSA" => Ok(Self::RsaOaepSha256),
            _ => Err(FlexvolError::Decode(format!(
                "unsupported asymmetric algorithm `{raw}`"
            ))),
        }
    }
}

/// Digest used for signatures and OAEP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Wire identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
        }
    }

    fn from_wire(raw: &str) -> Result<Self> {
        match normalize_identifier(raw).as_str() {
            "" | "SHA256" => Ok(Self::Sha256),
            _ => Err(FlexvolError::Decode(format!(
                "unsupported hash algorithm `{raw}`"
            ))),
        }
    }
}

/// Content key encrypted to the host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// Wrapping primitive.
    pub algorithm: AsymmetricAlgorithm,
    /// Digest paired with the wrapping primitive.
    pub hash_algorithm: HashAlgorithm,
    /// RSA ciphertext of the content key.
    pub ciphertext: Vec<u8>,
}

/// Hybrid envelope: symmetric payload plus wrapped key and optional signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecretEnvelope {
    /// Payload cipher.
    pub algorithm: SymmetricAlgorithm,
    /// Signature digest.
    pub hash_algorithm: HashAlgorithm,
    /// `nonce || ciphertext || tag`.
    pub payload: Vec<u8>,
    /// Wrapped content key.
    pub wrapped_key: WrappedKey,
    /// HMAC over `payload`, keyed with the content key.
    pub signature: Option<Vec<u8>>,
}

impl EncryptedSecretEnvelope {
    /// Payload nonce.
    pub fn nonce(&self) -> &[u8] {
        &self.payload[..NONCE_LENGTH]
    }

    /// Payload ciphertext with trailing tag.
    pub fn sealed(&self) -> &[u8] {
        &self.payload[NONCE_LENGTH..]
    }
}

/// Legacy envelope: the whole secret encrypted directly to the host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCiphertext {
    /// RSA-OAEP-SHA256 ciphertext.
    pub ciphertext: Vec<u8>,
}

/// Either on-wire envelope generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Hybrid RSA + AES-GCM envelope.
    Hybrid(EncryptedSecretEnvelope),
    /// Bare RSA ciphertext.
    Legacy(LegacyCiphertext),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeWire {
    encryption_algorithm: String,
    encrypted_text: String,
    #[serde(default)]
    hash_algorithm: String,
    encrypted_key: WrappedKeyWire,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrappedKeyWire {
    encryption_algorithm: String,
    encrypted_text: String,
    #[serde(default)]
    hash_algorithm: String,
}

/// Parses a serialized envelope of either generation.
pub fn parse(serialized: &str) -> Result<Envelope> {
    let cleaned = strip_transport_escapes(serialized);
    let decoded = decode_base64(&cleaned, "envelope")?;

    if !looks_like_json_document(&decoded) {
        return Ok(Envelope::Legacy(LegacyCiphertext {
            ciphertext: decoded,
        }));
    }

    let wire: EnvelopeWire = serde_json::from_slice(&decoded)
        .map_err(|error| FlexvolError::Decode(format!("malformed envelope json: {error}")))?;
    Ok(Envelope::Hybrid(from_wire(wire)?))
}

/// Serializes an envelope into its wire form.
pub fn encode(envelope: &Envelope) -> Result<String> {
    match envelope {
        Envelope::Legacy(legacy) => Ok(BASE64.encode(&legacy.ciphertext)),
        Envelope::Hybrid(hybrid) => {
            let wire = EnvelopeWire {
                encryption_algorithm: hybrid.algorithm.as_str().to_owned(),
                encrypted_text: BASE64.encode(&hybrid.payload),
                hash_algorithm: hybrid.hash_algorithm.as_str().to_owned(),
                encrypted_key: WrappedKeyWire {
                    encryption_algorithm: hybrid.wrapped_key.algorithm.as_str().to_owned(),
                    encrypted_text: BASE64.encode(&hybrid.wrapped_key.ciphertext),
                    hash_algorithm: hybrid.wrapped_key.hash_algorithm.as_str().to_owned(),
                },
                signature: hybrid.signature.as_ref().map(|bytes| BASE64.encode(bytes)),
            };
            Ok(BASE64.encode(serde_json::to_vec(&wire)?))
        }
    }
}

fn from_wire(wire: EnvelopeWire) -> Result<EncryptedSecretEnvelope> {
    let payload = decode_base64(&wire.encrypted_text, "encryptedText")?;
    if payload.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(FlexvolError::Decode(format!(
            "encryptedText too short: {} bytes",
            payload.len()
        )));
    }

    let signature = match wire.signature.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(decode_base64(raw, "signature")?),
    };

    Ok(EncryptedSecretEnvelope {
        algorithm: SymmetricAlgorithm::from_wire(&wire.encryption_algorithm)?,
        hash_algorithm: HashAlgorithm::from_wire(&wire.hash_algorithm)?,
        payload,
        wrapped_key: WrappedKey {
            algorithm: AsymmetricAlgorithm::from_wire(&wire.encrypted_key.encryption_algorithm)?,
            hash_algorithm: HashAlgorithm::from_wire(&wire.encrypted_key.hash_algorithm)?,
            ciphertext: decode_base64(&wire.encrypted_key.encrypted_text, "encryptedKey")?,
        },
        signature,
    })
}

/// Removes the backslashes upstream quoting inserts; base64 never contains one.
fn strip_transport_escapes(raw: &str) -> String {
    raw.chars()
        .filter(|character| *character != '\\' && !character.is_ascii_whitespace())
        .collect::<String>()
        .trim_matches('"')
        .to_owned()
}

fn decode_base64(raw: &str, field: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(raw.trim())
        .map_err(|error| FlexvolError::Decode(format!("malformed base64 in {field}: {error}")))
}

fn looks_like_json_document(decoded: &[u8]) -> bool {
    std::str::from_utf8(decoded)
        .map(|text| text.trim_start().starts_with('{'))
        .unwrap_or(false)
}

fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|character| character.is_ascii_alphanumeric())
        .map(|character| character.to_ascii_uppercase())
        .collect()
}
