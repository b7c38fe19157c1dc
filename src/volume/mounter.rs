use std::{
    io,
    path::Path,
    process::{Command, Output},
    thread,
    time::Duration,
};

use crate::error::{FlexvolError, Result};

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Mount primitives used by the volume lifecycle.
pub trait Mounter: Send + Sync {
    /// Mounts a memory-backed filesystem at `target` with `options` (e.g. `size=10m`).
    fn mount_tmpfs(&self, target: &Path, options: &str) -> Result<()>;
    /// Bind-mounts `source` read-write onto `target`.
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()>;
    /// Unmounts one mountpoint.
    fn unmount(&self, target: &Path) -> Result<()>;
    /// Returns whether `target` is a mountpoint.
    fn is_mounted(&self, target: &Path) -> Result<bool>;
}

/// Mounter driving the system `mount`, `umount`, and `mountpoint` binaries.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    mount_binary: String,
    umount_binary: String,
    mountpoint_binary: String,
}

impl SystemMounter {
    /// Constructs a mounter using default binary names.
    pub fn new() -> Self {
        Self {
            mount_binary: "mount".to_owned(),
            umount_binary: "umount".to_owned(),
            mountpoint_binary: "mountpoint".to_owned(),
        }
    }

    /// Constructs a mounter with custom binaries.
    pub fn with_binaries(
        mount_binary: impl Into<String>,
        umount_binary: impl Into<String>,
        mountpoint_binary: impl Into<String>,
    ) -> Self {
        Self {
            mount_binary: mount_binary.into(),
            umount_binary: umount_binary.into(),
            mountpoint_binary: mountpoint_binary.into(),
        }
    }

    fn run_mount(&self, args: &[&str], source: &Path, target: &Path, operation: &str) -> Result<()> {
        let output = retry_exec_busy(|| {
            Command::new(&self.mount_binary)
                .args(args)
                .arg(source)
                .arg(target)
                .output()
        })
        .map_err(|error| map_command_execution_error(&self.mount_binary, error))?;
        check_output(&output, operation, target)
    }
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Mounter for SystemMounter {
    fn mount_tmpfs(&self, target: &Path, options: &str) -> Result<()> {
        let mut args = vec!["-t", "tmpfs"];
        if !options.is_empty() {
            args.extend(["-o", options]);
        }
        self.run_mount(&args, Path::new("tmpfs"), target, "tmpfs mount")
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
        self.run_mount(&["-o", "bind,rw"], source, target, "bind mount")
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let output = retry_exec_busy(|| Command::new(&self.umount_binary).arg(target).output())
            .map_err(|error| map_command_execution_error(&self.umount_binary, error))?;
        check_output(&output, "unmount", target)
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        let status = retry_exec_busy(|| {
            Command::new(&self.mountpoint_binary)
                .arg("-q")
                .arg(target)
                .status()
        })
        .map_err(|error| map_command_execution_error(&self.mountpoint_binary, error))?;
        Ok(status.success())
    }
}

fn check_output(output: &Output, operation: &str, target: &Path) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    Err(FlexvolError::Mount(format!(
        "{operation} failed for {}: {stderr}",
        target.display()
    )))
}

fn map_command_execution_error(binary: &str, error: io::Error) -> FlexvolError {
    if error.kind() == io::ErrorKind::NotFound {
        return FlexvolError::Mount(format!("required binary not found: {binary}"));
    }
    FlexvolError::Io(error)
}

fn retry_exec_busy<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_error = None;
    for attempt in 0..EXEC_BUSY_RETRY_ATTEMPTS {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if is_exec_busy_error(&error) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                last_error = Some(error);
                thread::sleep(EXEC_BUSY_RETRY_DELAY);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("command execution failed")))
}

fn is_exec_busy_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ExecutableFileBusy || error.raw_os_error() == Some(26)
}
