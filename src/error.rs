use std::{io, path::PathBuf};

use thiserror::Error;

/// Validation failures for identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name is empty or too long.
    #[error("invalid name: must be 1..=128 characters")]
    InvalidName,
    /// Name attempts path traversal.
    #[error("invalid path: traversal is not allowed")]
    PathTraversal,
    /// Name contains unsupported characters.
    #[error("invalid character in name: use only A-Za-z0-9._-")]
    InvalidCharacter,
}

/// Failures talking to the remote secret service.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request could not be sent or the response could not be read.
    #[error("secret service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Service answered with a non-200 status.
    #[error("unsuccessful request: secret service returned HTTP {status}")]
    UnsuccessfulRequest {
        /// HTTP status code returned by the service.
        status: u16,
    },
    /// Response body was not a secret descriptor list.
    #[error("malformed secret service response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

/// Failures materializing one secret file.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Secret name cannot be used as a file name.
    #[error("invalid secret name `{name}`: {source}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Validation failure.
        source: ValidationError,
    },
    /// Mode string is not an octal permission value.
    #[error("invalid file mode `{0}`: expected octal permission bits")]
    InvalidMode(String),
    /// Uid or gid string is not a decimal id.
    #[error("invalid owner id `{0}`: expected a decimal uid/gid")]
    InvalidOwner(String),
    /// Filesystem write, chmod, or chown failed.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying syscall error.
        source: io::Error,
    },
}

/// Top-level driver errors.
#[derive(Debug, Error)]
pub enum FlexvolError {
    /// Envelope base64 or JSON was malformed.
    #[error("decode error: {0}")]
    Decode(String),
    /// Asymmetric or symmetric decryption failed, or the signature did not match.
    #[error("decrypt error: {0}")]
    Decrypt(String),
    /// Secret retrieval failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Secret file could not be written.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// Required option missing or invalid.
    #[error("config error: {0}")]
    Config(String),
    /// Mount helper failed.
    #[error("mount error: {0}")]
    Mount(String),
    /// Identifier validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON serialization error.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A typed result used across the crate.
pub type Result<T> = std::result::Result<T, FlexvolError>;

/// Missing or invalid option.
pub const ERROR_CODE_CONFIG: &str = "E100";
/// Volume or secret identifier validation error.
pub const ERROR_CODE_IDENTIFIER: &str = "E101";
/// Envelope decoding failure.
pub const ERROR_CODE_DECODE: &str = "E200";
/// Decryption or signature failure.
pub const ERROR_CODE_DECRYPT: &str = "E300";
/// Secret service failure.
pub const ERROR_CODE_FETCH: &str = "E400";
/// Secret file write failure.
pub const ERROR_CODE_WRITE: &str = "E500";
/// Mount helper failure.
pub const ERROR_CODE_MOUNT: &str = "E600";
/// Filesystem I/O failure.
pub const ERROR_CODE_IO: &str = "E900";
/// Internal serialization failure.
pub const ERROR_CODE_INTERNAL: &str = "E999";

/// Returns the stable error code for a driver error.
pub fn classify_error_code(error: &FlexvolError) -> &'static str {
    match error {
        FlexvolError::Config(_) => ERROR_CODE_CONFIG,
        FlexvolError::Validation(_) => ERROR_CODE_IDENTIFIER,
        FlexvolError::Decode(_) => ERROR_CODE_DECODE,
        FlexvolError::Decrypt(_) => ERROR_CODE_DECRYPT,
        FlexvolError::Fetch(_) => ERROR_CODE_FETCH,
        FlexvolError::Write(_) => ERROR_CODE_WRITE,
        FlexvolError::Mount(message) => classify_mount_code(message),
        FlexvolError::Io(_) => ERROR_CODE_IO,
        FlexvolError::Serde(_) => ERROR_CODE_INTERNAL,
    }
}

fn classify_mount_code(message: &str) -> &'static str {
    if message.to_ascii_lowercase().contains("required binary not found") {
        return ERROR_CODE_CONFIG;
    }
    ERROR_CODE_MOUNT
}
