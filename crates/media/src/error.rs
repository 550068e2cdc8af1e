//! Media subsystem error types.

use thiserror::Error;

/// Media storage operation errors.
#[derive(Debug, Error)]
pub enum MediaError {
    /// File extension is not in the image/video/audio allow-list.
    #[error("unsupported file type: '{filename}'")]
    UnsupportedType {
        /// Filename that was rejected.
        filename: String,
    },

    /// Upload exceeds the configured maximum size.
    #[error("upload of {size} bytes exceeds maximum allowed {max} bytes")]
    TooLarge {
        /// Declared or actual size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// Object not found in any registered tier.
    #[error("object not found: {key}")]
    NotFound {
        /// Key that was not found.
        key: String,
    },

    /// Remote tier unreachable or returned a transient failure.
    #[error("remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// Feature prerequisites absent or misconfigured.
    #[error("media configuration error: {0}")]
    Configuration(String),

    /// Storage operation failed.
    #[error("storage operation failed: {0}")]
    Operation(String),

    /// Reference-source (entity layer) read failed.
    #[error("reference source error: {0}")]
    Source(String),
}

impl MediaError {
    /// Create an unsupported-type error.
    #[must_use]
    pub fn unsupported_type(filename: impl Into<String>) -> Self {
        Self::UnsupportedType {
            filename: filename.into(),
        }
    }

    /// Create a too-large error.
    #[must_use]
    pub fn too_large(size: u64, max: u64) -> Self {
        Self::TooLarge { size, max }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a remote-unavailable error.
    #[must_use]
    pub fn remote_unavailable(msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an operation error.
    #[must_use]
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Create a reference-source error.
    #[must_use]
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }
}

impl From<opendal::Error> for MediaError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::NotFound {
                key: err.to_string(),
            },
            opendal::ErrorKind::Unsupported => Self::Configuration(err.to_string()),
            _ => Self::Operation(err.to_string()),
        }
    }
}
