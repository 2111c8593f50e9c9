//! # Playout Engine
//!
//! The media compositing core of the playout server: a real-time
//! video/audio pipeline that runs on a fixed frame clock, composes
//! concurrent video layers (each with its own producer state machine),
//! applies transitions between producers, and delivers composite frames to
//! consumers.
//!
//! **Architecture:** per-channel single-owner command task for all layer-map
//! mutations, fork-join frame collection inside each tick, bounded
//! per-consumer encode queues (capacity 8) with drop-on-full backpressure.

pub mod audio;
pub mod channel;
pub mod codec;
pub mod consumer;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod mixer;
pub mod muxer;
pub mod producer;

pub use error::{Error, Result};
pub use frame::{Frame, FrameFactory, ImageFrame, OutputFrame, Transform};
pub use producer::{share, Producer, SharedProducer};
