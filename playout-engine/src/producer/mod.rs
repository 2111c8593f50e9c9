//! Producers: lazy, pull-driven frame sources
//!
//! A producer hands one frame downstream per channel tick. Producers are
//! polymorphic and shared (`Arc<Mutex<_>>`) because a producer can be
//! referenced both by its layer and by a transition that is mixing it out;
//! the strong reference is handed off on promotion so the old producer lives
//! exactly as long as the transition needs it.
//!
//! Once `receive` returns [`Frame::Eos`] the producer is never polled again:
//! the caller either promotes its `following` producer or drops it.

pub mod color;
pub mod device;
pub mod layer;
pub mod transition;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::frame::{Frame, FrameFactory};

/// A source of timed frames with an optional successor.
#[async_trait]
pub trait Producer: Send {
    /// Produce the next frame at the channel cadence.
    async fn receive(&mut self) -> Result<Frame>;

    /// Successor for automatic chaining at end-of-stream.
    fn following(&mut self) -> Option<SharedProducer> {
        None
    }

    /// Inject the outgoing producer for transition contexts.
    fn set_leading(&mut self, _leading: SharedProducer) {}

    /// Bind to the channel's frame-allocation context.
    async fn initialize(&mut self, _factory: &Arc<FrameFactory>) -> Result<()> {
        Ok(())
    }

    /// Name used in log lines for traceability.
    fn print_name(&self) -> String;
}

/// Shared producer handle.
pub type SharedProducer = Arc<Mutex<dyn Producer>>;

/// Wrap a producer into a shared handle.
pub fn share(producer: impl Producer + 'static) -> SharedProducer {
    Arc::new(Mutex::new(producer))
}

/// Receive a frame from an optional producer slot, promoting the `following`
/// producer on end-of-stream.
///
/// On a receive error the producer is removed from the slot with a warning
/// and the slot reads as end-of-stream. On EOS with a `following` producer,
/// the successor is initialized, given the finished producer as its leading
/// side, swapped into the slot, and polled once more. A successor that fails
/// to initialize is dropped with a warning.
///
/// Returns [`Frame::Eos`] when the slot is (or becomes) empty.
pub async fn receive_and_follow(
    slot: &mut Option<SharedProducer>,
    factory: &Arc<FrameFactory>,
) -> Frame {
    loop {
        let Some(producer) = slot.as_ref() else {
            return Frame::Eos;
        };

        let (frame, name) = {
            let mut guard = producer.lock().await;
            (guard.receive().await, guard.print_name())
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{name}: receive failed, removing producer: {e}");
                *slot = None;
                return Frame::Eos;
            }
        };

        if !frame.is_eos() {
            return frame;
        }

        let following = producer.lock().await.following();
        let Some(next) = following else {
            *slot = None;
            return Frame::Eos;
        };

        let initialized = next.lock().await.initialize(factory).await;
        match initialized {
            Ok(()) => {
                let finished = slot.take().expect("slot checked non-empty above");
                next.lock().await.set_leading(finished);
                *slot = Some(next);
                // Retry on the promoted producer.
            }
            Err(e) => {
                warn!("{name}: failed to initialize following producer, removing it: {e}");
                *slot = None;
                return Frame::Eos;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Producer doubles shared by the unit tests in this module tree.

    use super::*;
    use crate::frame::ImageFrame;

    /// Produces `count` numbered frames then EOS; optionally chains into a
    /// following producer. Panics if polled after EOS.
    pub struct CountingProducer {
        pub name: String,
        pub remaining: u32,
        pub emitted: u32,
        pub following: Option<SharedProducer>,
        pub leading_seen: bool,
        pub initialized: bool,
        pub eos_returned: bool,
    }

    impl CountingProducer {
        pub fn new(name: &str, count: u32) -> CountingProducer {
            CountingProducer {
                name: name.to_string(),
                remaining: count,
                emitted: 0,
                following: None,
                leading_seen: false,
                initialized: false,
                eos_returned: false,
            }
        }

        pub fn frame(tag: u32) -> Frame {
            // 2x1 frame whose first byte encodes the sequence number.
            Frame::Image(Arc::new(ImageFrame {
                width: 2,
                height: 1,
                data: vec![tag as u8, 0, 0, 255, 0, 0, 0, 255],
                audio: vec![tag as i32, tag as i32],
                interlaced: false,
                top_field_first: false,
                timecode: None,
            }))
        }
    }

    #[async_trait]
    impl Producer for CountingProducer {
        async fn receive(&mut self) -> Result<Frame> {
            assert!(!self.eos_returned, "{}: receive called after EOS", self.name);
            if self.remaining == 0 {
                self.eos_returned = true;
                return Ok(Frame::Eos);
            }
            self.remaining -= 1;
            let frame = Self::frame(self.emitted);
            self.emitted += 1;
            Ok(frame)
        }

        fn following(&mut self) -> Option<SharedProducer> {
            self.following.take()
        }

        fn set_leading(&mut self, _leading: SharedProducer) {
            self.leading_seen = true;
        }

        async fn initialize(&mut self, _factory: &Arc<FrameFactory>) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn print_name(&self) -> String {
            self.name.clone()
        }
    }

    /// Always fails to receive.
    pub struct FaultyProducer;

    #[async_trait]
    impl Producer for FaultyProducer {
        async fn receive(&mut self) -> Result<Frame> {
            Err(crate::error::Error::Producer("synthetic fault".into()))
        }

        fn print_name(&self) -> String {
            "faulty-producer".to_string()
        }
    }

    pub fn frame_tag(frame: &Frame) -> Option<u32> {
        match frame {
            Frame::Image(image) => Some(image.data[0] as u32),
            Frame::Transformed(inner, _) => frame_tag(inner),
            _ => None,
        }
    }
}
