use thiserror::Error;

/// Common error type for motorlink components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid endpoint pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// Result type alias using motorlink's Error.
pub type Result<T> = std::result::Result<T, Error>;
