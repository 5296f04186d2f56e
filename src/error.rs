//! Error types for lesion analysis operations

use thiserror::Error;

/// Result type alias for lesion analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Error types for the analysis pipeline and archive
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding/saving errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Caller-supplied input is unusable (empty upload, undecodable image)
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Image bytes are not a recognized raster format after both decode attempts.
    /// Surfaced to callers as [`AnalysisError::BadInput`] at the processor boundary.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Predictor invocation failures (capability unavailable, malformed tensor)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model weight loading or predictor construction errors
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An archive entry whose id cannot be parsed as a timestamp
    #[error("Corrupt archive record: {0}")]
    CorruptRecord(String),

    /// Delete requested for a nonexistent analysis id
    #[error("Analysis not found: {0}")]
    NotFound(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Create a new bad input error
    pub fn bad_input<S: Into<String>>(msg: S) -> Self {
        Self::BadInput(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new corrupt record error
    pub fn corrupt_record<S: Into<String>>(msg: S) -> Self {
        Self::CorruptRecord(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Whether this failure should be reported to the uploader rather than
    /// logged as a server-side fault. Decode failures count: both decode
    /// attempts rejecting the bytes means the upload itself was bad.
    #[must_use]
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::BadInput(_) | Self::Decode(_) | Self::NotFound(_))
    }
}
