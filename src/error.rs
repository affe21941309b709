use serde::Serialize;
use thiserror::Error;

/// Video source activation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Failures that take a whole capability down until the user acts.
///
/// These are the only errors surfaced through the loop status; per-tick
/// detector errors are absorbed by the controller.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CapabilityError {
    #[error("camera permission denied")]
    CameraPermissionDenied,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("object detector failed to load: {0}")]
    DetectorLoad(String),
}

impl From<CameraError> for CapabilityError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::PermissionDenied => CapabilityError::CameraPermissionDenied,
            CameraError::DeviceUnavailable(msg) => CapabilityError::CameraUnavailable(msg),
        }
    }
}
