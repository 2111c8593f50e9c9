//! Layer state machine
//!
//! A layer is one z-ordered slot in a channel: at most one foreground
//! producer (on air) and one background producer (preloaded). Pausing
//! freezes the layer on its last emitted frame without polling the
//! foreground. When the foreground reaches end-of-stream its `following`
//! producer is promoted in place; with the auto-play flag set, a preloaded
//! background takes over instead of the layer going empty.

use std::sync::Arc;

use tracing::debug;

use crate::frame::{Frame, FrameFactory};
use crate::producer::{receive_and_follow, SharedProducer};

/// Per-layer producer state.
pub struct Layer {
    index: i32,
    foreground: Option<SharedProducer>,
    background: Option<SharedProducer>,
    paused: bool,
    auto_play_next: bool,
    last_frame: Frame,
}

impl Layer {
    pub fn new(index: i32) -> Layer {
        Layer {
            index,
            foreground: None,
            background: None,
            paused: false,
            auto_play_next: false,
            last_frame: Frame::Empty,
        }
    }

    /// Put a producer in the background slot. With `auto_play` the producer
    /// is promoted to the foreground immediately (and again automatically
    /// whenever a later foreground finishes).
    pub async fn load(&mut self, producer: SharedProducer, auto_play: bool) {
        self.background = Some(producer);
        if auto_play {
            self.auto_play_next = true;
            self.play().await;
        }
    }

    /// Promote the background into the foreground, handing the outgoing
    /// foreground to the incoming producer as its leading side. Without a
    /// background this resumes a paused layer.
    pub async fn play(&mut self) {
        if let Some(background) = self.background.take() {
            if let Some(foreground) = self.foreground.take() {
                background.lock().await.set_leading(foreground);
            }
            self.foreground = Some(background);
            debug!("layer[{}]: background promoted to foreground", self.index);
        }
        self.paused = false;
    }

    /// Freeze the layer on its last emitted frame.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Clear the foreground. The background, if any, stays loaded.
    pub fn stop(&mut self) {
        self.foreground = None;
        self.paused = false;
        self.last_frame = Frame::Empty;
    }

    /// Clear both producers.
    pub fn clear(&mut self) {
        self.foreground = None;
        self.background = None;
        self.paused = false;
        self.auto_play_next = false;
        self.last_frame = Frame::Empty;
    }

    pub fn foreground(&self) -> Option<SharedProducer> {
        self.foreground.clone()
    }

    pub fn background(&self) -> Option<SharedProducer> {
        self.background.clone()
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Produce this layer's frame for the current tick.
    pub async fn receive(&mut self, factory: &Arc<FrameFactory>) -> Frame {
        if self.paused {
            return self.last_frame.clone();
        }
        if self.foreground.is_none() {
            return Frame::Empty;
        }

        let mut frame = receive_and_follow(&mut self.foreground, factory).await;

        if frame.is_eos() {
            // Foreground finished with no follower; hand over to a preloaded
            // background when asked to, otherwise go dark.
            if self.auto_play_next && self.background.is_some() {
                debug!("layer[{}]: foreground ended, auto-playing background", self.index);
                self.play().await;
                frame = receive_and_follow(&mut self.foreground, factory).await;
            }
            if frame.is_eos() {
                frame = Frame::Empty;
            }
        }

        self.last_frame = frame.clone();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::{frame_tag, CountingProducer};
    use crate::producer::share;
    use playout_common::VideoFormatDesc;

    fn factory() -> Arc<FrameFactory> {
        FrameFactory::new(VideoFormatDesc::find("pal").unwrap())
    }

    #[tokio::test]
    async fn empty_layer_emits_empty() {
        let mut layer = Layer::new(0);
        assert!(layer.receive(&factory()).await.is_empty());
    }

    #[tokio::test]
    async fn load_without_auto_play_stays_in_background() {
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("bg", 3)), false).await;

        assert!(layer.foreground().is_none());
        assert!(layer.has_background());
        assert!(layer.receive(&factory()).await.is_empty());
    }

    #[tokio::test]
    async fn auto_play_promotes_immediately() {
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("fg", 3)), true).await;

        assert!(layer.foreground().is_some());
        assert!(!layer.has_background());
        assert_eq!(frame_tag(&layer.receive(&factory()).await), Some(0));
    }

    #[tokio::test]
    async fn pause_freezes_last_frame_without_polling() {
        let factory = factory();
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("fg", 2)), true).await;

        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(0));
        layer.pause();
        // Repeated receives return the frozen frame; the producer (which
        // would panic past EOS) is not polled.
        for _ in 0..5 {
            assert_eq!(frame_tag(&layer.receive(&factory).await), Some(0));
        }

        layer.play().await;
        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(1));
    }

    #[tokio::test]
    async fn double_pause_and_double_play_are_idempotent() {
        let factory = factory();
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("fg", 5)), true).await;

        layer.receive(&factory).await;
        layer.pause();
        layer.pause();
        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(0));

        layer.play().await;
        layer.play().await;
        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(1));
    }

    #[tokio::test]
    async fn stop_clears_foreground_keeps_background() {
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("fg", 5)), true).await;
        layer.load(share(CountingProducer::new("bg", 5)), false).await;

        layer.stop();
        assert!(layer.foreground().is_none());
        assert!(layer.has_background());
    }

    #[tokio::test]
    async fn auto_play_chains_into_background_at_eos() {
        let factory = factory();
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("first", 1)), true).await;
        layer.load(share(CountingProducer::new("second", 2)), false).await;

        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(0));
        // "first" is exhausted; the background takes over within the tick.
        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(0));
        assert!(layer.foreground().is_some());
        assert!(!layer.has_background());
    }

    #[tokio::test]
    async fn eos_without_background_goes_empty() {
        let factory = factory();
        let mut layer = Layer::new(0);
        layer.load(share(CountingProducer::new("fg", 1)), true).await;

        assert_eq!(frame_tag(&layer.receive(&factory).await), Some(0));
        assert!(layer.receive(&factory).await.is_empty());
        assert!(layer.foreground().is_none());
    }
}
