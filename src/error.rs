//! Shared error types referenced by more than one component's own
//! `thiserror` enum. Most errors live next to the component that raises them
//! (`crate::capture::CaptureError`, `crate::recorder::RecorderError`, ...);
//! this module only holds the few error kinds that cross module boundaries,
//! per the taxonomy in `spec.md` section 7.

use thiserror::Error;

/// A device/file-read failure severe enough to end the capture loop and
/// drive `CameraStateMachine` into `Error` (section 7, `SourceFatal`).
#[derive(Debug, Error)]
pub enum SourceFatalError {
    #[error("capture device disconnected: {0}")]
    DeviceDisconnected(String),
    #[error("source file unreadable: {0}")]
    FileUnreadable(String),
}

/// A transient, recoverable read failure (section 7, `SourceTransient`):
/// counted and logged, never changes component state.
#[derive(Debug, Error)]
#[error("transient source read failure: {0}")]
pub struct SourceTransientError(pub String);
