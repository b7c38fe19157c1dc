use std::{fs, path::Path};

use rsa::{pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, RsaPrivateKey};
use zeroize::Zeroizing;

use crate::error::{FlexvolError, Result};

/// Default location of the host private key.
pub const DEFAULT_HOST_KEY_PATH: &str = "/var/lib/rancher/etc/ssl/host.key";

/// Reads and parses the PEM-encoded host private key.
///
/// The key is read on every call and never cached.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = fs::read_to_string(path).map(Zeroizing::new).map_err(|error| {
        FlexvolError::Decrypt(format!(
            "failed to read private key {}: {error}",
            path.display()
        ))
    })?;
    parse_private_key_pem(&pem)
}

/// Parses a PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) PEM document.
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(pem) {
        return Ok(key);
    }
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|error| {
        FlexvolError::Decrypt(format!(
            "could not decode private key, is it PEM format? {error}"
        ))
    })
}
