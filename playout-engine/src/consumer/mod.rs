//! Consumers: back-pressured sinks for composite frames
//!
//! A consumer accepts one composite frame per channel tick. `send` never
//! blocks the tick thread: it posts into the consumer's bounded queue and
//! returns a completion future immediately. Backpressure is expressed by
//! dropping — a full queue discards the frame and the future still resolves
//! true.

pub mod convert;
pub mod encoder;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::frame::OutputFrame;

/// Completion signal for one sent frame. Resolves `true` once the frame is
/// encoded or intentionally dropped.
pub type SendAck = oneshot::Receiver<bool>;

/// Make an already-completed acknowledgement.
pub fn completed_ack(value: bool) -> SendAck {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(value);
    rx
}

/// A pull-driven sink encoding or transmitting frames at the channel
/// cadence.
#[async_trait]
pub trait Consumer: Send {
    /// Hand one composite frame to the consumer. Must not block.
    fn send(&mut self, frame: Arc<OutputFrame>) -> Result<SendAck>;

    /// Stop accepting frames, drain in-flight work and finalize outputs.
    async fn close(&mut self) -> Result<()>;

    /// Name used in log lines for traceability.
    fn print_name(&self) -> String;
}
