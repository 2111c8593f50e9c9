//! Transition producer
//!
//! A two-input mixer that blends an outgoing ("source", injected via
//! `set_leading`) and an incoming ("dest", fixed at construction) producer
//! over a fixed number of frames, then ends. The transition exposes dest as
//! its `following` producer, so the frame after the transition's EOS comes
//! from dest itself.
//!
//! Both sides are polled concurrently each tick; neither side can observe
//! the order of the two receives. A side that fails is dropped to
//! end-of-stream permanently. A missing source behaves as a source that is
//! always at end-of-stream and the dest is composited against nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameFactory, TexWindow, Transform};
use crate::producer::{receive_and_follow, Producer, SharedProducer};

/// Transition effect type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Source plays until the duration boundary, then a discrete switch
    Cut,
    /// Crossfade: dest fades in over source
    Mix,
    /// Dest slides in over a static source
    Slide,
    /// Dest pushes source out
    Push,
    /// Dest is revealed by a moving sample window
    Wipe,
}

impl TransitionKind {
    fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Cut => "cut",
            TransitionKind::Mix => "mix",
            TransitionKind::Slide => "slide",
            TransitionKind::Push => "push",
            TransitionKind::Wipe => "wipe",
        }
    }
}

/// Horizontal direction of slide/push/wipe motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDirection {
    FromLeft,
    FromRight,
}

impl TransitionDirection {
    fn sign(self) -> f64 {
        match self {
            TransitionDirection::FromLeft => 1.0,
            TransitionDirection::FromRight => -1.0,
        }
    }
}

/// Parameters fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInfo {
    pub kind: TransitionKind,
    /// Effect length in channel frames
    pub duration: u32,
    pub direction: TransitionDirection,
}

/// Two-input transition producer.
pub struct TransitionProducer {
    info: TransitionInfo,
    current_frame: u32,
    source: Option<SharedProducer>,
    dest: Option<SharedProducer>,
    dest_name: String,
    factory: Option<Arc<FrameFactory>>,
    ended_logged: bool,
}

impl TransitionProducer {
    pub fn new(dest: SharedProducer, info: TransitionInfo) -> TransitionProducer {
        TransitionProducer {
            info,
            current_frame: 0,
            source: None,
            dest: Some(dest),
            dest_name: String::new(),
            factory: None,
            ended_logged: false,
        }
    }

    fn compose(&self, dest_frame: Frame, source_frame: Frame) -> Frame {
        // A side at end-of-stream composites as nothing.
        let dest_frame = if dest_frame.is_eos() { Frame::Empty } else { dest_frame };
        let source_frame = if source_frame.is_eos() { Frame::Empty } else { source_frame };

        if self.info.kind == TransitionKind::Cut {
            return source_frame;
        }

        let alpha = self.current_frame as f64 / self.info.duration as f64;
        let dest_volume = ((alpha * 256.0).floor() as u16).min(255);
        let source_volume = 255 - dest_volume;
        let dir = self.info.direction.sign();

        let mut dest_transform = Transform::default().with_volume(dest_volume);
        let mut source_transform = Transform::default().with_volume(source_volume);

        match self.info.kind {
            TransitionKind::Cut => unreachable!("handled above"),
            TransitionKind::Mix => {
                dest_transform = dest_transform.with_alpha(alpha);
                source_transform = source_transform.with_alpha(1.0 - alpha);
            }
            TransitionKind::Slide => {
                dest_transform = dest_transform.with_translation((alpha - 1.0) * dir, 0.0);
            }
            TransitionKind::Push => {
                dest_transform = dest_transform.with_translation((alpha - 1.0) * dir, 0.0);
                source_transform = source_transform.with_translation(alpha * dir, 0.0);
            }
            TransitionKind::Wipe => {
                dest_transform = dest_transform
                    .with_translation((alpha - 1.0) * dir, 0.0)
                    .with_window(TexWindow {
                        x0: (alpha - 1.0) * dir,
                        y0: 0.0,
                        x1: 1.0 - (1.0 - alpha) * dir,
                        y1: 1.0,
                    });
            }
        }

        Frame::Group(vec![
            source_frame.transformed(source_transform),
            dest_frame.transformed(dest_transform),
        ])
    }
}

#[async_trait]
impl Producer for TransitionProducer {
    async fn receive(&mut self) -> Result<Frame> {
        let factory = self
            .factory
            .clone()
            .ok_or_else(|| Error::Producer(format!("{} not initialized", self.print_name())))?;

        if self.current_frame == 0 && !self.ended_logged {
            info!("{}: transition started", self.print_name());
        }

        if self.current_frame >= self.info.duration {
            if !self.ended_logged {
                info!("{}: transition ended", self.print_name());
                self.ended_logged = true;
            }
            return Ok(Frame::Eos);
        }

        let (dest_frame, source_frame) = tokio::join!(
            receive_and_follow(&mut self.dest, &factory),
            receive_and_follow(&mut self.source, &factory),
        );

        if dest_frame.is_eos() && source_frame.is_eos() {
            if !self.ended_logged {
                info!("{}: transition ended", self.print_name());
                self.ended_logged = true;
            }
            return Ok(Frame::Eos);
        }

        let composed = self.compose(dest_frame, source_frame);
        self.current_frame += 1;
        Ok(composed)
    }

    fn following(&mut self) -> Option<SharedProducer> {
        self.dest.clone()
    }

    fn set_leading(&mut self, leading: SharedProducer) {
        self.source = Some(leading);
    }

    async fn initialize(&mut self, factory: &Arc<FrameFactory>) -> Result<()> {
        if let Some(dest) = &self.dest {
            let mut guard = dest.lock().await;
            guard.initialize(factory).await?;
            self.dest_name = guard.print_name();
        }
        self.factory = Some(Arc::clone(factory));
        Ok(())
    }

    fn print_name(&self) -> String {
        if self.dest_name.is_empty() {
            format!("transition[{}]", self.info.kind.as_str())
        } else {
            format!("transition[{}->{}]", self.info.kind.as_str(), self.dest_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::{frame_tag, CountingProducer, FaultyProducer};
    use crate::producer::share;
    use playout_common::VideoFormatDesc;

    fn factory() -> Arc<FrameFactory> {
        FrameFactory::new(VideoFormatDesc::find("pal").unwrap())
    }

    fn transition(kind: TransitionKind, duration: u32, dest: SharedProducer) -> TransitionProducer {
        TransitionProducer::new(
            dest,
            TransitionInfo { kind, duration, direction: TransitionDirection::FromLeft },
        )
    }

    async fn init(producer: &mut TransitionProducer) {
        let factory = factory();
        producer.initialize(&factory).await.unwrap();
    }

    #[tokio::test]
    async fn zero_duration_emits_eos_immediately() {
        let mut t = transition(TransitionKind::Mix, 0, share(CountingProducer::new("dest", 10)));
        init(&mut t).await;
        assert!(t.receive().await.unwrap().is_eos());
        assert!(t.receive().await.unwrap().is_eos());
    }

    #[tokio::test]
    async fn cut_plays_source_until_the_boundary() {
        let mut t = transition(TransitionKind::Cut, 5, share(CountingProducer::new("dest", 10)));
        t.set_leading(share(CountingProducer::new("source", 10)));
        init(&mut t).await;

        for expected in 0..5 {
            let frame = t.receive().await.unwrap();
            assert_eq!(frame_tag(&frame), Some(expected), "tick {expected} should show source");
        }
        assert!(t.receive().await.unwrap().is_eos());

        // The producer after the transition is dest itself.
        let following = t.following().expect("transition must expose dest");
        assert_eq!(following.lock().await.print_name(), "dest");
    }

    #[tokio::test]
    async fn mix_applies_linear_alpha_and_volume() {
        let duration = 4;
        let mut t = transition(
            TransitionKind::Mix,
            duration,
            share(CountingProducer::new("dest", 10)),
        );
        t.set_leading(share(CountingProducer::new("source", 10)));
        init(&mut t).await;

        for k in 0..duration {
            let frame = t.receive().await.unwrap();
            let Frame::Group(children) = frame else { panic!("mix must compose a group") };
            assert_eq!(children.len(), 2);

            let alpha = k as f64 / duration as f64;
            let dest_volume = (alpha * 256.0).floor() as u16;

            let Frame::Transformed(_, source_tf) = &children[0] else { panic!() };
            let Frame::Transformed(_, dest_tf) = &children[1] else { panic!() };

            assert!((dest_tf.alpha - alpha).abs() < 1e-9);
            assert!((source_tf.alpha - (1.0 - alpha)).abs() < 1e-9);
            assert_eq!(dest_tf.volume, dest_volume);
            assert_eq!(source_tf.volume, 255 - dest_volume);
        }
        assert!(t.receive().await.unwrap().is_eos());
    }

    #[tokio::test]
    async fn push_translates_both_sides() {
        let mut t = transition(TransitionKind::Push, 4, share(CountingProducer::new("dest", 10)));
        t.set_leading(share(CountingProducer::new("source", 10)));
        init(&mut t).await;

        t.receive().await.unwrap(); // alpha 0
        let frame = t.receive().await.unwrap(); // alpha 0.25
        let Frame::Group(children) = frame else { panic!() };
        let Frame::Transformed(_, source_tf) = &children[0] else { panic!() };
        let Frame::Transformed(_, dest_tf) = &children[1] else { panic!() };

        assert!((dest_tf.translation.0 - (-0.75)).abs() < 1e-9);
        assert!((source_tf.translation.0 - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn wipe_narrows_the_dest_window() {
        let mut t = transition(TransitionKind::Wipe, 4, share(CountingProducer::new("dest", 10)));
        t.set_leading(share(CountingProducer::new("source", 10)));
        init(&mut t).await;

        t.receive().await.unwrap();
        t.receive().await.unwrap();
        let frame = t.receive().await.unwrap(); // alpha 0.5
        let Frame::Group(children) = frame else { panic!() };
        let Frame::Transformed(_, dest_tf) = &children[1] else { panic!() };

        assert!((dest_tf.window.x0 - (-0.5)).abs() < 1e-9);
        assert!((dest_tf.window.x1 - 0.5).abs() < 1e-9);
        assert!((dest_tf.translation.0 - (-0.5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_source_composites_dest_alone() {
        let mut t = transition(TransitionKind::Mix, 2, share(CountingProducer::new("dest", 10)));
        init(&mut t).await;

        let frame = t.receive().await.unwrap();
        let Frame::Group(children) = frame else { panic!() };
        assert!(matches!(children[0], Frame::Transformed(ref inner, _) if inner.is_empty()));
    }

    #[tokio::test]
    async fn faulty_source_is_dropped_permanently() {
        let mut t = transition(TransitionKind::Mix, 3, share(CountingProducer::new("dest", 10)));
        t.set_leading(share(FaultyProducer));
        init(&mut t).await;

        for _ in 0..3 {
            let frame = t.receive().await.unwrap();
            let Frame::Group(children) = frame else { panic!() };
            assert!(matches!(children[0], Frame::Transformed(ref inner, _) if inner.is_empty()));
        }
    }

    #[tokio::test]
    async fn both_sides_eos_ends_the_transition_early() {
        let mut t = transition(TransitionKind::Mix, 100, share(CountingProducer::new("dest", 2)));
        t.set_leading(share(CountingProducer::new("source", 2)));
        init(&mut t).await;

        assert!(!t.receive().await.unwrap().is_eos());
        assert!(!t.receive().await.unwrap().is_eos());
        assert!(t.receive().await.unwrap().is_eos());
    }
}
