use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    audit::{AuditEvent, AuditLog},
    crypto::{envelope, load_private_key, Decryptor},
    error::{classify_error_code, FlexvolError, Result},
    fetch::SecretSource,
    fs_secure::{remove_dir_if_exists, remove_empty_dir_if_exists, set_permissions},
    materialize::SecretSink,
    paths::VolumePaths,
    types::{DecryptedSecret, SecretName, SecretRequest},
};

use super::{
    mounter::Mounter,
    options::{AttachRequest, DeleteOptions, TmpfsOptions, VolumeOptions},
};

/// Volume returned by [`VolumeController::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedVolume {
    /// Volume name.
    pub name: SecretName,
    /// Staging device path.
    pub device: PathBuf,
}

/// What is mounted at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    /// Nothing is mounted.
    Unmounted,
    /// The staging tmpfs is mounted.
    TmpfsMounted,
    /// A staging device is bind-mounted onto a consumer target.
    BindMounted,
}

/// Lifecycle phase as observed on the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumePhase {
    /// Staging directory exists without a tmpfs behind it.
    Uninitialized,
    /// Tmpfs mounted, no secrets written yet.
    Created,
    /// Tmpfs mounted and holding secrets.
    Attached,
    /// Consumer target carries the bind mount.
    Mounted,
    /// Consumer target no longer carries the bind mount.
    Unmounted,
    /// Staging directory is gone.
    Detached,
}

/// Observed state of a staging device or consumer target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeState {
    /// Inspected path.
    pub device: PathBuf,
    /// Mount status of the path.
    pub mount: MountStatus,
    /// Lifecycle phase.
    pub phase: VolumePhase,
}

/// Sequences the staging volume lifecycle.
///
/// Every operation is a blocking call scoped to the paths it is given; the
/// controller keeps no tokens, keys, or plaintext between calls.
pub struct VolumeController<M, S, D, W>
where
    M: Mounter,
    S: SecretSource,
    D: Decryptor,
    W: SecretSink,
{
    paths: VolumePaths,
    host_key: PathBuf,
    tmpfs_defaults: TmpfsOptions,
    mounter: M,
    source: S,
    decryptor: D,
    sink: W,
    audit_log: AuditLog,
}

impl<M, S, D, W> VolumeController<M, S, D, W>
where
    M: Mounter,
    S: SecretSource,
    D: Decryptor,
    W: SecretSink,
{
    /// Constructs a controller.
    pub fn new(
        paths: VolumePaths,
        host_key: impl Into<PathBuf>,
        mounter: M,
        source: S,
        decryptor: D,
        sink: W,
        audit_log: AuditLog,
    ) -> Self {
        Self {
            paths,
            host_key: host_key.into(),
            tmpfs_defaults: TmpfsOptions::default(),
            mounter,
            source,
            decryptor,
            sink,
            audit_log,
        }
    }

    /// Replaces the tmpfs settings used when options leave them unset.
    pub fn with_tmpfs_defaults(mut self, tmpfs_defaults: TmpfsOptions) -> Self {
        self.tmpfs_defaults = tmpfs_defaults;
        self
    }

    /// Path layout in use.
    pub fn paths(&self) -> &VolumePaths {
        &self.paths
    }

    /// Readiness check. Nothing needs preparing ahead of the first volume.
    pub fn init(&self) -> Result<()> {
        debug!(root = %self.paths.root().display(), "driver initialized");
        Ok(())
    }

    /// Allocates the staging tmpfs for a named volume.
    pub fn create(&self, raw_options: &str) -> Result<CreatedVolume> {
        let options = VolumeOptions::parse(raw_options, &self.tmpfs_defaults)?;
        let device = self.ensure_staging(&options)?;
        info!(volume = %options.name, device = %device.display(), "volume created");
        self.audit_log.log(AuditEvent::VolumeCreated {
            volume: options.name.to_string(),
            device: device.clone(),
        })?;
        Ok(CreatedVolume {
            name: options.name,
            device,
        })
    }

    /// Fetches, decrypts, and writes the volume's secrets into its staging tmpfs.
    ///
    /// The staging mount is left in place on failure so a retry can reuse it.
    pub fn attach(&self, raw_params: &str) -> Result<PathBuf> {
        let AttachRequest { token, volume } = AttachRequest::parse(raw_params, &self.tmpfs_defaults)?;
        let device = self.ensure_staging(&volume)?;
        let request = SecretRequest {
            token,
            volume: volume.name.clone(),
        };

        match self.provision(request, &device) {
            Ok(secrets) => {
                info!(
                    volume = %volume.name,
                    device = %device.display(),
                    count = secrets.len(),
                    "secrets materialized"
                );
                if let Err(audit_error) = self.audit_log.log(AuditEvent::SecretsMaterialized {
                    volume: volume.name.to_string(),
                    device: device.clone(),
                    secrets,
                }) {
                    warn!(%audit_error, "failed to record materialized secrets");
                }
                Ok(device)
            }
            Err(error) => {
                let code = classify_error_code(&error);
                warn!(volume = %volume.name, code, %error, "attach failed");
                if let Err(audit_error) = self.audit_log.log(AuditEvent::AttachFailed {
                    volume: volume.name.to_string(),
                    code: code.to_owned(),
                }) {
                    warn!(%audit_error, "failed to record attach failure");
                }
                Err(error)
            }
        }
    }

    /// Bind-mounts a staging device onto the consumer target.
    ///
    /// A target that is already a mountpoint is left as is. Its mount source is
    /// not compared against `device`.
    pub fn mount(&self, target: &Path, device: &Path) -> Result<()> {
        self.require_staging_device(device)?;
        if self.mounter.is_mounted(target)? {
            debug!(target = %target.display(), "target already mounted");
            return Ok(());
        }
        fs::create_dir_all(target)?;
        self.mounter.bind_mount(device, target)?;
        info!(device = %device.display(), target = %target.display(), "volume mounted");
        self.audit_log.log(AuditEvent::VolumeMounted {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
        })
    }

    /// Removes the consumer bind mount and its target directory.
    pub fn unmount(&self, target: &Path) -> Result<()> {
        if self.mounter.is_mounted(target)? {
            self.mounter.unmount(target)?;
        }
        remove_empty_dir_if_exists(target)?;
        info!(target = %target.display(), "volume unmounted");
        self.audit_log.log(AuditEvent::VolumeUnmounted {
            target: target.to_path_buf(),
        })
    }

    /// Unmounts the staging tmpfs and purges its contents.
    pub fn detach(&self, device: &Path) -> Result<()> {
        self.require_staging_device(device)?;
        if self.mounter.is_mounted(device)? {
            self.mounter.unmount(device)?;
        }
        remove_dir_if_exists(device)?;
        info!(device = %device.display(), "volume detached");
        self.audit_log.log(AuditEvent::VolumeDetached {
            device: device.to_path_buf(),
        })
    }

    /// Detaches the device named in the options, if any.
    pub fn delete(&self, raw_options: &str) -> Result<()> {
        let options = DeleteOptions::parse(raw_options)?;
        match options.device.filter(|device| !device.as_os_str().is_empty()) {
            Some(device) => self.detach(&device),
            None => {
                debug!("delete without device is a no-op");
                Ok(())
            }
        }
    }

    /// Reports mount status and lifecycle phase for a staging device or target.
    pub fn inspect(&self, path: &Path) -> Result<VolumeState> {
        let mounted = path.exists() && self.mounter.is_mounted(path)?;
        let is_staging = self.paths.is_staging_device(path);
        let populated = is_staging && mounted && has_entries(path)?;
        let (mount, phase) = match (is_staging, mounted) {
            (true, true) if populated => (MountStatus::TmpfsMounted, VolumePhase::Attached),
            (true, true) => (MountStatus::TmpfsMounted, VolumePhase::Created),
            (true, false) if path.exists() => (MountStatus::Unmounted, VolumePhase::Uninitialized),
            (true, false) => (MountStatus::Unmounted, VolumePhase::Detached),
            (false, true) => (MountStatus::BindMounted, VolumePhase::Mounted),
            (false, false) => (MountStatus::Unmounted, VolumePhase::Unmounted),
        };
        Ok(VolumeState {
            device: path.to_path_buf(),
            mount,
            phase,
        })
    }

    fn provision(&self, request: SecretRequest, device: &Path) -> Result<Vec<String>> {
        let descriptors = self.source.fetch(&request)?;
        drop(request);
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        let key = load_private_key(&self.host_key)?;
        let mut decrypted = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let envelope = envelope::parse(&descriptor.rewrap_text)?;
            let plaintext = self.decryptor.decrypt(&envelope, &key)?;
            decrypted.push(DecryptedSecret {
                descriptor,
                plaintext,
            });
        }
        drop(key);

        let names: Vec<String> = decrypted
            .iter()
            .map(|secret| secret.descriptor.name.clone())
            .collect();
        self.sink.materialize(decrypted, device)?;
        Ok(names)
    }

    fn ensure_staging(&self, options: &VolumeOptions) -> Result<PathBuf> {
        let device = self.paths.staging_dir(&options.name);
        if self.mounter.is_mounted(&device)? {
            debug!(device = %device.display(), "staging tmpfs already mounted");
            return Ok(device);
        }

        fs::create_dir_all(&device)?;
        set_permissions(&device, options.tmpfs.dir_mode)?;
        self.mounter
            .mount_tmpfs(&device, &tmpfs_mount_options(&options.tmpfs))?;
        Ok(device)
    }

    fn require_staging_device(&self, device: &Path) -> Result<()> {
        if self.paths.is_staging_device(device) {
            return Ok(());
        }
        Err(FlexvolError::Config(format!(
            "device {} is not a staging volume under {}",
            device.display(),
            self.paths.staging_root().display()
        )))
    }
}

/// Mount options with the staging mode applied to the tmpfs root.
fn tmpfs_mount_options(tmpfs: &TmpfsOptions) -> String {
    let has_mode = tmpfs
        .mount_options
        .split(',')
        .any(|option| option.trim_start().starts_with("mode="));
    match (tmpfs.mount_options.is_empty(), has_mode) {
        (_, true) => tmpfs.mount_options.clone(),
        (true, false) => format!("mode={:o}", tmpfs.dir_mode),
        (false, false) => format!("{},mode={:o}", tmpfs.mount_options, tmpfs.dir_mode),
    }
}

fn has_entries(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)?.next().is_some())
}

#[cfg(test)]
mod unit_tests {
    use super::tmpfs_mount_options;
    use crate::volume::options::TmpfsOptions;

    #[test]
    fn mount_options_gain_root_mode() {
        let options = TmpfsOptions {
            dir_mode: 0o755,
            mount_options: "size=10m".to_owned(),
        };
        assert_eq!(tmpfs_mount_options(&options), "size=10m,mode=755");
    }

    #[test]
    fn explicit_mode_option_is_kept() {
        let options = TmpfsOptions {
            dir_mode: 0o755,
            mount_options: "size=1m,mode=0700".to_owned(),
        };
        assert_eq!(tmpfs_mount_options(&options), "size=1m,mode=0700");
    }

    #[test]
    fn empty_options_only_carry_mode() {
        let options = TmpfsOptions {
            dir_mode: 0o700,
            mount_options: String::new(),
        };
        assert_eq!(tmpfs_mount_options(&options), "mode=700");
    }
}
