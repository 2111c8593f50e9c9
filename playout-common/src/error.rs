//! Error types shared across the playout workspace.

use thiserror::Error;

/// Error type for shared playout facilities
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown or malformed video format name
    #[error("Unknown video format: {0}")]
    UnknownFormat(String),

    /// TOML parse errors
    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the common Error
pub type Result<T> = std::result::Result<T, Error>;
