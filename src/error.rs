//! Error types for fastspeech2-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// A tensor's batch, time or feature dimension disagrees with what an
    /// operation expects (e.g. auxiliary frames vs. mel frames).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Invalid configuration, or inputs that contradict it (speaker ids on a
    /// single-speaker model and vice versa).
    #[error("config: {0}")]
    Config(String),

    /// Mel length information required but unavailable.
    #[error("undefined length: {0}")]
    UndefinedLength(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
