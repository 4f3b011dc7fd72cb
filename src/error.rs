//! Typed failure taxonomy.
//!
//! Errors travel as `anyhow::Error` throughout the crate. The three failure
//! classes the control loop cares about are tagged with a `ScanError` so
//! callers can recover the kind with `err.downcast_ref::<ScanError>()`.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// I/O or schema failure on the product store.
    Storage,
    /// Capture device unavailable or frame read failure.
    Capture,
    /// Model load or inference failure.
    Model,
}

impl ScanErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanErrorKind::Storage => "storage",
            ScanErrorKind::Capture => "capture",
            ScanErrorKind::Model => "model",
        }
    }
}

#[derive(Debug)]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub message: String,
}

impl ScanError {
    pub fn new(kind: ScanErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn storage(err: impl fmt::Display) -> anyhow::Error {
        Self::new(ScanErrorKind::Storage, err.to_string()).into()
    }

    pub fn capture(err: impl fmt::Display) -> anyhow::Error {
        Self::new(ScanErrorKind::Capture, err.to_string()).into()
    }

    pub fn model(err: impl fmt::Display) -> anyhow::Error {
        Self::new(ScanErrorKind::Model, err.to_string()).into()
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ScanError {}

/// Returns the failure class of an error chain, if any link is a `ScanError`.
pub fn error_kind(err: &anyhow::Error) -> Option<ScanErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ScanError>())
        .map(|scan| scan.kind)
}
