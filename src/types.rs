use std::fmt;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, WriteError};

const MAX_NAME_LENGTH: usize = 128;
const MAX_MODE_BITS: u32 = 0o7777;

/// Default mode for materialized secrets: read-only for the owner.
pub const DEFAULT_FILE_MODE: u32 = 0o400;
/// Default owner for materialized secrets.
pub const DEFAULT_UID: u32 = 0;
/// Default group for materialized secrets.
pub const DEFAULT_GID: u32 = 0;

/// Validated file or volume name that stays inside its parent directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SecretName(String);

impl SecretName {
    /// Creates a validated name.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(ValidationError::InvalidName);
        }
        if name == "." || name.contains("..") || name.contains('/') {
            return Err(ValidationError::PathTraversal);
        }
        if !name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || "_.-".contains(character))
        {
            return Err(ValidationError::InvalidCharacter);
        }
        Ok(Self(name.to_owned()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret bytes wrapper that avoids accidental logging and zeroizes on drop.
pub struct SecretValue {
    inner: Secret<Vec<u8>>,
}

impl SecretValue {
    /// Constructs a secret value from bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Exposes the secret bytes to a closure.
    pub fn expose<F, R>(&self, function: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        function(self.inner.expose_secret())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

/// One-time token exchanged for a batch of encrypted secrets.
pub struct SecretToken {
    inner: Secret<Vec<u8>>,
}

impl SecretToken {
    /// Wraps raw token bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Raw token bytes, used as the request body.
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// Request handed to a secret source for one attach.
#[derive(Debug)]
pub struct SecretRequest {
    /// Token consumed by this request.
    pub token: SecretToken,
    /// Volume the secrets are destined for.
    pub volume: SecretName,
}

/// One secret as described by the secret service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretDescriptor {
    /// File name under the staging directory.
    pub name: String,
    /// Owner uid, decimal. Empty selects the policy default.
    #[serde(default)]
    pub uid: String,
    /// Owner gid, decimal. Empty selects the policy default.
    #[serde(default)]
    pub gid: String,
    /// Octal permission bits. Empty selects the policy default.
    #[serde(default)]
    pub mode: String,
    /// Serialized envelope carrying the encrypted content.
    #[serde(rename = "rewrapText", default)]
    pub rewrap_text: String,
}

/// Descriptor paired with its plaintext, alive only until the file is written.
#[derive(Debug)]
pub struct DecryptedSecret {
    /// Source descriptor.
    pub descriptor: SecretDescriptor,
    /// Decrypted content.
    pub plaintext: SecretValue,
}

/// Permissions and ownership applied to a secret file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePolicy {
    /// Permission bits.
    pub mode: u32,
    /// Owner uid.
    pub uid: u32,
    /// Owner gid.
    pub gid: u32,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            mode: DEFAULT_FILE_MODE,
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
        }
    }
}

impl FilePolicy {
    /// Resolves a descriptor against this policy, filling empty fields with defaults.
    pub fn resolve(&self, descriptor: &SecretDescriptor) -> Result<FilePolicy, WriteError> {
        let mode = match descriptor.mode.trim() {
            "" => self.mode,
            raw => parse_mode(raw)?,
        };
        let uid = match descriptor.uid.trim() {
            "" => self.uid,
            raw => parse_owner_id(raw)?,
        };
        let gid = match descriptor.gid.trim() {
            "" => self.gid,
            raw => parse_owner_id(raw)?,
        };
        Ok(FilePolicy { mode, uid, gid })
    }
}

/// Parses an octal permission string such as `0400`, `777`, or `0o640`.
pub fn parse_mode(raw: &str) -> Result<u32, WriteError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0o")
        .or_else(|| trimmed.strip_prefix("0O"))
        .unwrap_or(trimmed);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| WriteError::InvalidMode(raw.to_owned()))?;
    if digits.is_empty() || mode > MAX_MODE_BITS {
        return Err(WriteError::InvalidMode(raw.to_owned()));
    }
    Ok(mode)
}

/// Parses a decimal uid or gid.
pub fn parse_owner_id(raw: &str) -> Result<u32, WriteError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| WriteError::InvalidOwner(raw.to_owned()))
}
