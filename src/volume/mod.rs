//! Staging volume lifecycle.

/// Lifecycle controller.
pub mod controller;
/// Mount primitives.
pub mod mounter;
/// Typed option payloads.
pub mod options;

pub use controller::{CreatedVolume, MountStatus, VolumeController, VolumePhase, VolumeState};
pub use mounter::{Mounter, SystemMounter};
pub use options::{AttachRequest, DeleteOptions, TmpfsOptions, VolumeOptions};
