use thiserror::Error;

use crate::source::SourceError;

/// Errors surfaced by capture sessions.
///
/// # Examples
/// ```
/// use livetap_core::CaptureError;
///
/// let err = CaptureError::Configuration("no interfaces available".to_string());
/// assert!(err.to_string().contains("no interfaces"));
/// assert!(!err.is_benign());
/// ```
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to start capture process `{program}`: {source}")]
    SubprocessStart {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The capture tool ended on its own without producing a usable
    /// capture: a non-zero exit, or no capture stream at all.
    #[error("capture process failed ({status}): {}", describe_stderr(.stderr))]
    ProcessFailed { status: String, stderr: String },
    #[error("failed to list capture interfaces: {0}")]
    InterfaceQuery(String),
    #[error("failed to decode capture output: {0}")]
    Decode(#[from] SourceError),
    #[error("cancellation not delivered: the capture run already finished")]
    CancellationDelivery,
}

impl CaptureError {
    /// Whether the error is informational only and must not abort anything.
    pub fn is_benign(&self) -> bool {
        matches!(self, CaptureError::CancellationDelivery)
    }
}

fn describe_stderr(stderr: &str) -> &str {
    if stderr.is_empty() {
        "no diagnostics on stderr"
    } else {
        stderr
    }
}
