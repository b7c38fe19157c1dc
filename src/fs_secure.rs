use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    os::unix::fs::{chown, OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use uuid::Uuid;

use crate::{
    error::{Result, WriteError},
    types::FilePolicy,
};

/// Default Unix mode for private directories.
pub const PRIVATE_DIR_MODE: u32 = 0o700;
/// Default Unix mode for private files.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Ensures a directory exists and applies restricted permissions.
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    set_permissions(path, PRIVATE_DIR_MODE)
}

/// Writes a private file only if it does not exist.
pub fn create_private_file_if_missing(path: &Path, bytes: &[u8]) -> Result<()> {
    if !path.exists() {
        create_parent_dir(path)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(PRIVATE_FILE_MODE)
            .open(path)?;
        file.write_all(bytes)?;
    }
    Ok(())
}

/// Applies Unix permissions.
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Writes one secret file with the requested mode and owner.
///
/// The content lands in a hidden sibling created with the requested mode, is
/// chowned, then chmod'ed to the exact bits, and only then renamed onto `path`.
/// The chmod comes last because chown clears setuid and setgid bits. The final path never exists with wider bits or partial content,
/// and an existing file is replaced as a whole.
pub fn write_secret_file(
    path: &Path,
    bytes: &[u8],
    policy: FilePolicy,
) -> std::result::Result<(), WriteError> {
    let temp_path = temp_path_for(path);
    let outcome = write_then_rename(&temp_path, path, bytes, policy);
    if outcome.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    outcome.map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_then_rename(temp_path: &Path, path: &Path, bytes: &[u8], policy: FilePolicy) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(policy.mode)
        .open(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    chown(temp_path, Some(policy.uid), Some(policy.gid))?;
    fs::set_permissions(temp_path, fs::Permissions::from_mode(policy.mode))?;
    fs::rename(temp_path, path)
}

/// Removes a directory tree if it exists.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// Removes an empty directory if it exists. A non-empty directory is an error.
pub fn remove_empty_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let suffix = Uuid::new_v4();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("tmp");
    let temp_name = format!(".{file_name}.{suffix}.tmp");
    path.with_file_name(temp_name)
}

fn create_parent_dir(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    Ok(())
}
