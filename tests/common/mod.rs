#![allow(dead_code)]

use std::{
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use aes_gcm::{aead::Aead, Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::{pkcs1::EncodeRsaPrivateKey, pkcs1::LineEnding, Oaep, RsaPrivateKey, RsaPublicKey};
use secrets_flexvol::{
    crypto::envelope::{
        self, AsymmetricAlgorithm, EncryptedSecretEnvelope, Envelope, HashAlgorithm,
        LegacyCiphertext, SymmetricAlgorithm, WrappedKey,
    },
    types::{FilePolicy, SecretDescriptor},
};
use sha2::Sha256;

const TEST_KEY_BITS: usize = 1024;

/// Shared host key. Generated once per test binary.
pub fn host_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), TEST_KEY_BITS)
            .unwrap_or_else(|error| panic!("failed to generate test key: {error}"))
    })
}

/// A second key the envelopes were never sealed for.
pub fn other_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), TEST_KEY_BITS)
            .unwrap_or_else(|error| panic!("failed to generate test key: {error}"))
    })
}

/// Writes `key` as a PKCS#1 PEM file under `dir`.
pub fn write_key_pem(dir: &Path, key: &RsaPrivateKey) -> PathBuf {
    let path = dir.join("host.key");
    let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
    std::fs::write(&path, pem.as_bytes())
        .unwrap_or_else(|error| panic!("failed to write {}: {error}", path.display()));
    path
}

/// Seals `plaintext` in a hybrid AES-256-GCM envelope for `public_key`.
pub fn seal_hybrid(plaintext: &[u8], public_key: &RsaPublicKey, signed: bool) -> Envelope {
    seal_hybrid_with(SymmetricAlgorithm::Aes256Gcm, plaintext, public_key, signed)
}

/// Seals `plaintext` in a hybrid envelope using `algorithm`.
pub fn seal_hybrid_with(
    algorithm: SymmetricAlgorithm,
    plaintext: &[u8],
    public_key: &RsaPublicKey,
    signed: bool,
) -> Envelope {
    let mut rng = rand::thread_rng();
    let mut content_key = vec![0_u8; algorithm.key_length()];
    rng.fill_bytes(&mut content_key);
    let mut nonce = [0_u8; envelope::NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);

    let sealed = match algorithm {
        SymmetricAlgorithm::Aes128Gcm => <Aes128Gcm as KeyInit>::new_from_slice(&content_key)
            .unwrap()
            .encrypt(Nonce::from_slice(&nonce), plaintext),
        SymmetricAlgorithm::Aes256Gcm => <Aes256Gcm as KeyInit>::new_from_slice(&content_key)
            .unwrap()
            .encrypt(Nonce::from_slice(&nonce), plaintext),
    }
    .unwrap();
    let mut payload = nonce.to_vec();
    payload.extend_from_slice(&sealed);

    let signature = signed.then(|| {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&content_key).unwrap();
        mac.update(&payload);
        mac.finalize().into_bytes().to_vec()
    });

    let wrapped = public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), &content_key)
        .unwrap();

    Envelope::Hybrid(EncryptedSecretEnvelope {
        algorithm,
        hash_algorithm: HashAlgorithm::Sha256,
        payload,
        wrapped_key: WrappedKey {
            algorithm: AsymmetricAlgorithm::RsaOaepSha256,
            hash_algorithm: HashAlgorithm::Sha256,
            ciphertext: wrapped,
        },
        signature,
    })
}

/// Encrypts `plaintext` directly to `public_key`.
pub fn seal_legacy(plaintext: &[u8], public_key: &RsaPublicKey) -> Envelope {
    let ciphertext = public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext)
        .unwrap();
    Envelope::Legacy(LegacyCiphertext { ciphertext })
}

/// Wire form of a signed hybrid envelope for the shared host key.
pub fn sealed_text(plaintext: &[u8]) -> String {
    let public_key = host_key().to_public_key();
    envelope::encode(&seal_hybrid(plaintext, &public_key, true)).unwrap()
}

/// Descriptor with empty mode/uid/gid.
pub fn descriptor(name: &str, rewrap_text: String) -> SecretDescriptor {
    SecretDescriptor {
        name: name.to_owned(),
        rewrap_text,
        ..SecretDescriptor::default()
    }
}

/// Policy owned by whoever runs the tests, so chown succeeds without root.
pub fn caller_policy(dir: &Path, mode: u32) -> FilePolicy {
    let metadata = std::fs::metadata(dir).unwrap();
    FilePolicy {
        mode,
        uid: metadata.uid(),
        gid: metadata.gid(),
    }
}

/// Returns `true` when the tests run as root.
pub fn running_as_root(dir: &Path) -> bool {
    std::fs::metadata(dir).unwrap().uid() == 0
}
