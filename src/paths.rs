use std::path::{Path, PathBuf};

use crate::types::SecretName;

/// Default driver root on the host.
pub const DEFAULT_VOLUME_ROOT: &str = "/var/lib/rancher/volumes/rancher-secrets";

/// Canonical path layout for driver runtime files.
#[derive(Debug, Clone)]
pub struct VolumePaths {
    root: PathBuf,
}

impl VolumePaths {
    /// Creates a path layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parent of every staging volume.
    pub fn staging_root(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Staging directory for one volume.
    pub fn staging_dir(&self, volume: &SecretName) -> PathBuf {
        self.staging_root().join(volume.as_str())
    }

    /// Audit log JSONL file.
    pub fn audit_file(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    /// Whether `device` is a direct child of the staging root.
    pub fn is_staging_device(&self, device: &Path) -> bool {
        let staging_root = self.staging_root();
        match device.strip_prefix(&staging_root) {
            Ok(relative) => {
                let mut components = relative.components();
                matches!(
                    (components.next(), components.next()),
                    (Some(std::path::Component::Normal(name)), None)
                        if name.to_str().is_some_and(|value| SecretName::new(value).is_ok())
                )
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use std::path::Path;

    use super::VolumePaths;
    use crate::types::SecretName;

    #[test]
    fn staging_dir_lives_under_staging_root() {
        let paths = VolumePaths::new("/var/lib/rancher/volumes/rancher-secrets");
        let name = SecretName::new("web-secrets").unwrap();
        assert_eq!(
            paths.staging_dir(&name),
            Path::new("/var/lib/rancher/volumes/rancher-secrets/staging/web-secrets")
        );
    }

    #[test]
    fn staging_device_check_rejects_escapes() {
        let paths = VolumePaths::new("/srv/secrets");
        assert!(paths.is_staging_device(Path::new("/srv/secrets/staging/vol1")));
        assert!(!paths.is_staging_device(Path::new("/srv/secrets/staging")));
        assert!(!paths.is_staging_device(Path::new("/srv/secrets/staging/../audit.jsonl")));
        assert!(!paths.is_staging_device(Path::new("/srv/secrets/staging/vol1/nested")));
        assert!(!paths.is_staging_device(Path::new("/etc")));
    }
}
