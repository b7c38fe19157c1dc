use std::path::Path;

use tracing::debug;

use crate::{
    error::{Result, WriteError},
    fs_secure::write_secret_file,
    types::{DecryptedSecret, FilePolicy, SecretName},
};

/// Destination for decrypted secrets.
pub trait SecretSink: Send + Sync {
    /// Writes every secret into `destination`, in order, stopping at the first failure.
    fn materialize(&self, secrets: Vec<DecryptedSecret>, destination: &Path) -> Result<()>;
}

/// Writes each secret as a file named after the descriptor.
///
/// Empty mode/uid/gid fields take the sink's [`FilePolicy`]. Files written before a
/// failure are left in place; the caller detaches the volume to clean up.
#[derive(Debug, Clone, Default)]
pub struct FileSecretSink {
    policy: FilePolicy,
}

impl FileSecretSink {
    /// Creates a sink applying `policy` to unspecified fields.
    pub fn new(policy: FilePolicy) -> Self {
        Self { policy }
    }

    /// Default policy for this sink.
    pub fn policy(&self) -> FilePolicy {
        self.policy
    }
}

impl SecretSink for FileSecretSink {
    fn materialize(&self, secrets: Vec<DecryptedSecret>, destination: &Path) -> Result<()> {
        for secret in secrets {
            let DecryptedSecret {
                descriptor,
                plaintext,
            } = secret;
            let name = SecretName::new(&descriptor.name).map_err(|source| WriteError::InvalidName {
                name: descriptor.name.clone(),
                source,
            })?;
            let policy = self.policy.resolve(&descriptor)?;
            let path = destination.join(name.as_str());

            plaintext.expose(|bytes| write_secret_file(&path, bytes, policy))?;
            debug!(
                secret = %name,
                mode = %format!("{:04o}", policy.mode),
                uid = policy.uid,
                gid = policy.gid,
                "materialized secret"
            );
        }
        Ok(())
    }
}
