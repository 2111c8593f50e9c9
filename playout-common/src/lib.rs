//! # Playout Common Library
//!
//! Shared code for the playout engine:
//! - Video format descriptors and audio-cadence math
//! - Frame timing helpers
//! - Event types (PlayoutEvent enum) and the event bus
//! - Diagnostics graphs and the process-wide graph registry
//! - Configuration loading

pub mod config;
pub mod diag;
pub mod error;
pub mod events;
pub mod format;
pub mod timing;

pub use error::{Error, Result};
pub use format::{FieldMode, VideoFormat, VideoFormatDesc};
