//! Error types for the recorder.
//!
//! All errors implement the `std::error::Error` trait and carry enough context
//! to tell the operator what went wrong and whether the pipeline survives it.
//!
//! ## Error Categories
//!
//! - **Fatal setup**: missing or malformed startup inputs, failed attach to the
//!   frame region, encoder creation/start failure, remote misconfiguration
//! - **Fatal runtime**: encoder submit/retrieve failure, frame source
//!   invalidation; the loop stops and every resource is released
//! - **Recoverable**: storage open/write failures; the sink degrades to closed
//!   and frames are dropped until the next successful rotation
//! - **Warning**: the encoder rejected a requested parameter
//!
//! ```rust
//! use shmrec::{ErrorSeverity, RecorderError};
//!
//! let error = RecorderError::missing_input("width");
//! assert_eq!(error.severity(), ErrorSeverity::FatalSetup);
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for recorder operations.
pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

/// How an error affects the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Reported to the operator; the process exits non-zero.
    FatalSetup,
    /// The capture loop stops and tears down; the process still exits zero.
    FatalRuntime,
    /// Swallowed where it happens; the frame is dropped and the loop continues.
    Recoverable,
    /// Logged; the run continues with whatever the encoder retained.
    Warning,
}

/// Failure reported by an encoder backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed with status {status}: {message}")]
pub struct EncoderError {
    pub operation: &'static str,
    pub status: i32,
    pub message: String,
}

impl EncoderError {
    pub fn new(operation: &'static str, status: i32, message: impl Into<String>) -> Self {
        Self { operation, status, message: message.into() }
    }
}

/// Main error type for recorder operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RecorderError {
    #[error("Missing required input '{name}'")]
    MissingInput { name: String },

    #[error("Invalid value '{value}' for '{name}': {reason}")]
    InvalidInput { name: String, value: String, reason: String },

    #[error("Configuration file error: {path}: {details}")]
    ConfigFile { path: PathBuf, details: String },

    #[error("Failed to attach to frame region '{name}': {reason}")]
    Attach {
        name: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Frame source invalidated: {reason}")]
    SourceInvalidated { reason: String },

    #[error("Encoder rejected parameters '{group}'")]
    Configuration {
        group: String,
        #[source]
        source: EncoderError,
    },

    #[error("Failed to start encoder")]
    EncoderStart {
        #[source]
        source: EncoderError,
    },

    #[error("Failed to encode frame {frame}")]
    Encode {
        frame: u64,
        #[source]
        source: EncoderError,
    },

    #[error("Failed to retrieve encoded output for frame {frame}")]
    Retrieve {
        frame: u64,
        #[source]
        source: EncoderError,
    },

    #[error("Encoder reported {reported} bytes of output but the buffer holds {capacity}")]
    OutputOverflow { reported: usize, capacity: usize },

    #[error("Cannot {operation} while encoder session is {state}")]
    InvalidState { operation: &'static str, state: &'static str },

    #[error("Storage error on {path}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Remote control misconfigured: {reason}")]
    RemoteMisconfigured { reason: String },

    #[error("Pipeline task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("Control channel error: {reason}")]
    ControlChannel {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RecorderError {
    /// Returns where this error falls in the recorder's failure taxonomy.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RecorderError::MissingInput { .. } => ErrorSeverity::FatalSetup,
            RecorderError::InvalidInput { .. } => ErrorSeverity::FatalSetup,
            RecorderError::ConfigFile { .. } => ErrorSeverity::FatalSetup,
            RecorderError::Attach { .. } => ErrorSeverity::FatalSetup,
            RecorderError::EncoderStart { .. } => ErrorSeverity::FatalSetup,
            RecorderError::RemoteMisconfigured { .. } => ErrorSeverity::FatalSetup,
            RecorderError::SourceInvalidated { .. } => ErrorSeverity::FatalRuntime,
            RecorderError::Encode { .. } => ErrorSeverity::FatalRuntime,
            RecorderError::Retrieve { .. } => ErrorSeverity::FatalRuntime,
            RecorderError::OutputOverflow { .. } => ErrorSeverity::FatalRuntime,
            RecorderError::InvalidState { .. } => ErrorSeverity::FatalRuntime,
            RecorderError::TaskFailed { .. } => ErrorSeverity::FatalRuntime,
            RecorderError::Storage { .. } => ErrorSeverity::Recoverable,
            RecorderError::Parse { .. } => ErrorSeverity::Recoverable,
            RecorderError::ControlChannel { .. } => ErrorSeverity::Recoverable,
            RecorderError::Configuration { .. } => ErrorSeverity::Warning,
        }
    }

    /// Returns whether this error ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::FatalSetup | ErrorSeverity::FatalRuntime)
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RecorderError::MissingInput { .. } | RecorderError::InvalidInput { .. } => vec![
                "Provide --name, --width, --height and --cid",
                "Width and height must be even and non-zero",
            ],
            RecorderError::ConfigFile { .. } => vec![
                "Check the configuration file exists and is readable",
                "Verify the YAML keys match the command line option names",
            ],
            RecorderError::Attach { .. } => vec![
                "Ensure the frame producer is running",
                "Check the region name and permissions",
            ],
            RecorderError::SourceInvalidated { .. } => vec![
                "Restart the frame producer",
                "Restart the recorder once frames are available again",
            ],
            RecorderError::Configuration { .. } => vec![
                "Check the requested encoder tunables are supported by the device",
            ],
            RecorderError::EncoderStart { .. } => vec![
                "Verify the encoder device is present and accessible",
                "Try a smaller resolution or the default tunables",
            ],
            RecorderError::Encode { .. } | RecorderError::Retrieve { .. } => vec![
                "Check the encoder device health",
                "Restart the recorder",
            ],
            RecorderError::OutputOverflow { .. } => vec![
                "Lower the quantizer range or raise the bitrate budget",
            ],
            RecorderError::InvalidState { .. } => vec![
                "Configure and start the encoder session before submitting frames",
            ],
            RecorderError::TaskFailed { .. } => vec![
                "Check the log for the cause and restart the recorder",
            ],
            RecorderError::Storage { .. } => vec![
                "Check free disk space",
                "Check write permissions on the output directory",
                "Send a new start command to rotate into a fresh file",
            ],
            RecorderError::Parse { .. } => vec![
                "Verify the file was produced by this recorder",
                "A truncated tail is expected after a crash; earlier records remain readable",
            ],
            RecorderError::RemoteMisconfigured { .. } => vec![
                "Pass --cid=<session> together with --remote",
            ],
            RecorderError::ControlChannel { .. } => vec![
                "Check the network interface supports multicast",
                "Verify no other process holds the control port exclusively",
            ],
        }
    }

    /// Helper constructor for missing startup inputs.
    pub fn missing_input(name: impl Into<String>) -> Self {
        RecorderError::MissingInput { name: name.into() }
    }

    /// Helper constructor for malformed startup inputs.
    pub fn invalid_input(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        RecorderError::InvalidInput { name: name.into(), value: value.into(), reason: reason.into() }
    }

    /// Helper constructor for attach failures.
    pub fn attach_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RecorderError::Attach { name: name.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for attach failures with source.
    pub fn attach_failed_with_source(
        name: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RecorderError::Attach { name: name.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for source invalidation.
    pub fn source_invalidated(reason: impl Into<String>) -> Self {
        RecorderError::SourceInvalidated { reason: reason.into() }
    }

    /// Helper constructor for storage errors with path context.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecorderError::Storage { path: path.into(), source }
    }

    /// Helper constructor for record parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        RecorderError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for control channel errors.
    pub fn control_channel(reason: impl Into<String>) -> Self {
        RecorderError::ControlChannel { reason: reason.into(), source: None }
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::Storage { path: PathBuf::from("<unknown>"), source: err }
    }
}
