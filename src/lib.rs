#![deny(missing_docs)]
//! Secrets flexvolume driver: fetches encrypted secrets with a one-time token,
//! decrypts them with the host key, and materializes them on a tmpfs staging volume.

/// Audit log module.
pub mod audit;
/// Command-line interface.
pub mod cli;
/// Driver config parsing and validation.
pub mod config;
/// Envelope codec and decryption.
pub mod crypto;
/// Error types.
pub mod error;
/// Secret service client.
pub mod fetch;
/// Secure filesystem helpers.
pub mod fs_secure;
/// Secret file writer.
pub mod materialize;
/// Shared runtime path layout.
pub mod paths;
/// Shared types.
pub mod types;
/// Staging volume lifecycle.
pub mod volume;
