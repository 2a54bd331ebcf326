/// Result alias that carries the custom [`BeatLayerError`] type.
pub type Result<T> = std::result::Result<T, BeatLayerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatLayerError {
    /// Free-form failure that does not fit one of the typed variants.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A caller handed in an argument the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Audio bytes could not be decoded into PCM frames.
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// An analysis or pattern provider returned output of the wrong shape.
    #[error("invalid external response: {0}")]
    InvalidResponse(String),
    /// The clock or trigger scheduler refused a command.
    #[error("audio backend failure: {0}")]
    Backend(String),
    /// Malformed configuration file.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl BeatLayerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for BeatLayerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatLayerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
