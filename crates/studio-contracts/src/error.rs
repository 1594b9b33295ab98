use thiserror::Error;

/// Failure taxonomy shared by the session reducer, the codec and the clients.
///
/// An image service that answers without an image is not represented here;
/// that outcome is a regular result of an edit call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    /// Missing prompt, missing image, or an action the current phase forbids.
    /// Handled locally and never sent to the service.
    #[error("{0}")]
    Validation(String),

    /// An encoded image could not be split into media type and payload.
    #[error("malformed image encoding: {0}")]
    MalformedEncoding(String),

    /// Transport, authentication or service-side failure of an edit call.
    #[error("{0}")]
    InferenceService(String),

    /// Missing credential or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEncoding(message.into())
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::InferenceService(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Stable label used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MalformedEncoding(_) => "malformed_encoding",
            Self::InferenceService(_) => "inference_service",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for StudioError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
