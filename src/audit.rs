use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    fs_secure::{create_private_file_if_missing, set_permissions, PRIVATE_FILE_MODE},
};

/// Lifecycle events recorded by the driver. Never carries secret values.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Staging tmpfs was created or found already mounted.
    VolumeCreated {
        /// Volume name.
        volume: String,
        /// Staging device path.
        device: PathBuf,
    },
    /// Secrets were written into a staging volume.
    SecretsMaterialized {
        /// Volume name.
        volume: String,
        /// Staging device path.
        device: PathBuf,
        /// Names of the written secret files.
        secrets: Vec<String>,
    },
    /// Attach failed before every secret was written.
    AttachFailed {
        /// Volume name.
        volume: String,
        /// Stable error code.
        code: String,
    },
    /// Staging device was bind-mounted for a consumer.
    VolumeMounted {
        /// Staging device path.
        device: PathBuf,
        /// Consumer mount target.
        target: PathBuf,
    },
    /// Consumer bind mount was removed.
    VolumeUnmounted {
        /// Consumer mount target.
        target: PathBuf,
    },
    /// Staging device was unmounted and purged.
    VolumeDetached {
        /// Staging device path.
        device: PathBuf,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AuditLine {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: AuditEvent,
}

/// JSONL append-only audit log writer.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        create_private_file_if_missing(&file_path, b"")?;
        set_permissions(&file_path, PRIVATE_FILE_MODE)?;
        Ok(Self { path: file_path })
    }

    /// Appends one event as a JSON line.
    pub fn log(&self, event: AuditEvent) -> Result<()> {
        let line = AuditLine {
            timestamp: Utc::now(),
            event,
        };

        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Returns the audit file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
