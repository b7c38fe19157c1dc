use std::{
    io::{self, Write},
    path::PathBuf,
};

use serde::Serialize;

use crate::volume::VolumeState;

/// Result of writing to an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStatus {
    /// Write completed.
    Written,
    /// Stream was closed by the reader.
    BrokenPipe,
}

/// Outcome reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum DriverStatus {
    Success,
    Failure,
}

/// One driver response object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DriverOutput {
    pub(crate) status: DriverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) device: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) volume_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) state: Option<VolumeState>,
}

impl DriverOutput {
    pub(crate) fn success() -> Self {
        Self {
            status: DriverStatus::Success,
            message: None,
            device: None,
            volume_name: None,
            state: None,
        }
    }

    pub(crate) fn failure(message: String) -> Self {
        Self {
            status: DriverStatus::Failure,
            message: Some(message),
            ..Self::success()
        }
    }

    pub(crate) fn with_device(mut self, device: PathBuf) -> Self {
        self.device = Some(device);
        self
    }

    pub(crate) fn with_volume_name(mut self, volume_name: String) -> Self {
        self.volume_name = Some(volume_name);
        self
    }

    pub(crate) fn with_state(mut self, state: VolumeState) -> Self {
        self.state = Some(state);
        self
    }

    pub(crate) fn exit_code(&self) -> i32 {
        match self.status {
            DriverStatus::Success => 0,
            DriverStatus::Failure => 1,
        }
    }
}

fn map_result(result: io::Result<()>) -> io::Result<OutputStatus> {
    match result {
        Ok(()) => Ok(OutputStatus::Written),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(OutputStatus::BrokenPipe),
        Err(error) => Err(error),
    }
}

/// Writes text and a newline to stdout.
pub(crate) fn stdout_line(text: &str) -> io::Result<OutputStatus> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    map_result(
        handle
            .write_all(text.as_bytes())
            .and_then(|_| handle.write_all(b"\n"))
            .and_then(|_| handle.flush()),
    )
}
