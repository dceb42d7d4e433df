//! Error types for call coordination
//!
//! Errors in this crate never cross the public `Call` API as return values.
//! They are produced by the consumed capabilities (device provider, media
//! transport, rendering sinks) and are converted into call notifications by
//! the state machine:
//!
//! - **Media acquisition** - the device provider could not start capture
//!   streams; reported as `answer.failed`, the call stays in its prior state
//! - **Sink errors** - an output device was rejected; reported as `error`,
//!   the sink keeps playing on the default device
//! - **Transport errors** - a sender track could not be replaced or removed
//! - **Configuration errors** - a configuration file could not be read
//!
//! # Logging errors
//!
//! ```rust
//! use softphone_call_core::CallError;
//!
//! let error = CallError::media_acquisition_failed("permission denied");
//! tracing::warn!(category = error.category(), error = %error, "answer aborted");
//! assert!(error.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias for call-core operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors raised by call collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Local capture streams could not be started
    #[error("Media acquisition failed: {reason}")]
    MediaAcquisitionFailed { reason: String },

    /// A rendering sink rejected an operation (usually output device selection)
    #[error("Sink error on {target}: {reason}")]
    SinkFailed { target: String, reason: String },

    /// The media transport rejected a mutation
    #[error("Transport error: {reason}")]
    TransportFailed { reason: String },

    /// The media transport is closed and cannot be mutated
    #[error("Transport closed")]
    TransportClosed,

    /// Configuration could not be parsed
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Configuration file could not be read
    #[error("Configuration I/O error: {reason}")]
    ConfigurationIo { reason: String },
}

impl CallError {
    /// Create a media acquisition failed error
    pub fn media_acquisition_failed(reason: impl Into<String>) -> Self {
        Self::MediaAcquisitionFailed { reason: reason.into() }
    }

    /// Create a sink error for the given target (e.g. `remote.audio`)
    pub fn sink_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SinkFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Self::TransportFailed { reason: reason.into() }
    }

    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallError::MediaAcquisitionFailed { .. }
            | CallError::SinkFailed { .. }
            | CallError::TransportFailed { .. } => true,

            CallError::TransportClosed
            | CallError::InvalidConfiguration { .. }
            | CallError::ConfigurationIo { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallError::MediaAcquisitionFailed { .. } | CallError::SinkFailed { .. } => "media",
            CallError::TransportFailed { .. } | CallError::TransportClosed => "transport",
            CallError::InvalidConfiguration { .. } | CallError::ConfigurationIo { .. } => {
                "configuration"
            }
        }
    }
}
