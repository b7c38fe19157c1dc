#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use secrets_flexvol::{
    error::{classify_error_code, FlexvolError},
    volume::{Mounter, SystemMounter},
};

const LOGGING_SCRIPT: &str = r#"#!/usr/bin/env bash
set -euo pipefail
echo "$*" >> "__LOG__"
"#;
const MOUNTPOINT_SCRIPT: &str = r#"#!/usr/bin/env bash
set -euo pipefail
if [[ "$1" != "-q" ]]; then
  exit 2
fi
if [[ -f "$2/.mounted" ]]; then
  exit 0
fi
exit 1
"#;

struct FakeBinaries {
    temp_dir: tempfile::TempDir,
    bin_dir: PathBuf,
    logs_dir: PathBuf,
}

impl FakeBinaries {
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let bin_dir = temp_dir.path().join("bin");
        let logs_dir = temp_dir.path().join("logs");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::create_dir_all(&logs_dir).unwrap();
        for binary in ["mount", "umount"] {
            write_script(
                &bin_dir.join(binary),
                &LOGGING_SCRIPT.replace(
                    "__LOG__",
                    &logs_dir.join(format!("{binary}.log")).to_string_lossy(),
                ),
            );
        }
        write_script(&bin_dir.join("mountpoint"), MOUNTPOINT_SCRIPT);
        Self {
            temp_dir,
            bin_dir,
            logs_dir,
        }
    }

    fn mounter(&self) -> SystemMounter {
        SystemMounter::with_binaries(
            self.bin_dir.join("mount").to_string_lossy().to_string(),
            self.bin_dir.join("umount").to_string_lossy().to_string(),
            self.bin_dir.join("mountpoint").to_string_lossy().to_string(),
        )
    }

    fn log(&self, binary: &str) -> String {
        fs::read_to_string(self.logs_dir.join(format!("{binary}.log"))).unwrap_or_default()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

#[test]
fn tmpfs_mount_passes_type_and_options() {
    let fake = FakeBinaries::new();
    let target = fake.temp_dir.path().join("staging/web");

    fake.mounter().mount_tmpfs(&target, "size=10m,mode=755").unwrap();

    assert_eq!(
        fake.log("mount").trim(),
        format!("-t tmpfs -o size=10m,mode=755 tmpfs {}", target.display())
    );
}

#[test]
fn tmpfs_mount_without_options_omits_flag() {
    let fake = FakeBinaries::new();
    let target = fake.temp_dir.path().join("staging/web");

    fake.mounter().mount_tmpfs(&target, "").unwrap();

    assert_eq!(
        fake.log("mount").trim(),
        format!("-t tmpfs tmpfs {}", target.display())
    );
}

#[test]
fn bind_mount_is_read_write() {
    let fake = FakeBinaries::new();
    let source = fake.temp_dir.path().join("staging/web");
    let target = fake.temp_dir.path().join("pod/secrets");

    fake.mounter().bind_mount(&source, &target).unwrap();

    assert_eq!(
        fake.log("mount").trim(),
        format!("-o bind,rw {} {}", source.display(), target.display())
    );
}

#[test]
fn unmount_passes_target() {
    let fake = FakeBinaries::new();
    let target = fake.temp_dir.path().join("pod/secrets");

    fake.mounter().unmount(&target).unwrap();

    assert_eq!(fake.log("umount").trim(), target.display().to_string());
}

#[test]
fn is_mounted_follows_mountpoint_exit_status() {
    let fake = FakeBinaries::new();
    let target = fake.temp_dir.path().join("pod/secrets");
    fs::create_dir_all(&target).unwrap();
    let mounter = fake.mounter();

    assert!(!mounter.is_mounted(&target).unwrap());
    fs::write(target.join(".mounted"), b"").unwrap();
    assert!(mounter.is_mounted(&target).unwrap());
}

#[test]
fn failing_mount_reports_stderr() {
    let fake = FakeBinaries::new();
    write_script(
        &fake.bin_dir.join("mount"),
        "#!/usr/bin/env bash\necho 'permission denied' >&2\nexit 32\n",
    );
    let target = fake.temp_dir.path().join("staging/web");

    let error = fake.mounter().mount_tmpfs(&target, "size=10m").unwrap_err();

    assert!(matches!(
        &error,
        FlexvolError::Mount(message)
            if message.contains("tmpfs mount failed") && message.contains("permission denied")
    ));
    assert_eq!(classify_error_code(&error), "E600");
}

#[test]
fn missing_binary_is_a_config_level_mount_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("no-such-umount");
    let mounter = SystemMounter::with_binaries(
        "mount",
        missing.to_string_lossy().to_string(),
        "mountpoint",
    );

    let error = mounter.unmount(temp_dir.path()).unwrap_err();

    assert!(matches!(
        &error,
        FlexvolError::Mount(message) if message.contains("required binary not found")
    ));
    assert_eq!(classify_error_code(&error), "E100");
}
