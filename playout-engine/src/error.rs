//! Error types for the playout engine
//!
//! Fatal errors surface at the public operation boundary; per-tick and
//! per-side producer failures are caught at their boundary, logged with the
//! component print-name, and swallowed to preserve liveness.

use thiserror::Error;

/// Main error type for the playout engine
#[derive(Error, Debug)]
pub enum Error {
    /// Construction-time configuration errors (invalid filename, unknown
    /// codec, unsupported dimensions). Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Codec backend failures (open, encode, write)
    #[error("Codec error: {0}")]
    Codec(String),

    /// A producer failed to deliver a frame
    #[error("Producer error: {0}")]
    Producer(String),

    /// Frame muxer inner-queue overflow; typically wrong source frame-rate
    /// metadata
    #[error("{stream}-stream overflow in {print_name}. This can be caused by an incorrect frame-rate. Check clip meta-data.")]
    MuxerOverflow {
        print_name: String,
        stream: &'static str,
    },

    /// Filter expression parse or execution errors
    #[error("Filter graph error: {0}")]
    FilterGraph(String),

    /// Consumer failures past construction
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Audio resampling failures
    #[error("Resample error: {0}")]
    Resample(String),

    /// Shared facility errors
    #[error(transparent)]
    Common(#[from] playout_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
