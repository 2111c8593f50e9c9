//! Frame model
//!
//! Frames are immutable once produced: a leaf carries a BGRA image plane and
//! interleaved 32-bit signed audio behind an `Arc`; transforms compose by
//! wrapping rather than by mutation. `Eos` and `Empty` are sentinel frames —
//! `Eos` marks end-of-stream (sticky per producer), `Empty` is a valid
//! nothing-to-show frame.

use std::sync::Arc;

use playout_common::format::VideoFormatDesc;

use crate::error::{Error, Result};
use crate::gpu::{HostBufferPool, Usage};

/// Interleaved 32-bit signed PCM audio.
pub type AudioBuffer = Vec<i32>;

/// Normalized texture-coordinate sampling window.
///
/// `(0, 0)` is the top-left of the source image, `(1, 1)` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexWindow {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Default for TexWindow {
    fn default() -> Self {
        TexWindow { x0: 0.0, y0: 0.0, x1: 1.0, y1: 1.0 }
    }
}

impl TexWindow {
    pub fn is_full(&self) -> bool {
        *self == TexWindow::default()
    }

    fn intersect(&self, other: &TexWindow) -> TexWindow {
        TexWindow {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }
}

/// Affine frame transform: opacity, 2D translation in normalized screen
/// units, a texture-coordinate sampling window and an audio volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Opacity multiplier, 0.0..=1.0
    pub alpha: f64,
    /// Normalized screen translation; (1, 0) moves one full frame width right
    pub translation: (f64, f64),
    /// Source sampling window
    pub window: TexWindow,
    /// Audio volume, 0..=255 where 255 is unity
    pub volume: u16,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            alpha: 1.0,
            translation: (0.0, 0.0),
            window: TexWindow::default(),
            volume: 255,
        }
    }
}

impl Transform {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_translation(mut self, x: f64, y: f64) -> Self {
        self.translation = (x, y);
        self
    }

    pub fn with_window(mut self, window: TexWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_volume(mut self, volume: u16) -> Self {
        self.volume = volume.min(255);
        self
    }

    /// Combine an outer transform with an inner one (outer applied last).
    pub fn combined(&self, inner: &Transform) -> Transform {
        Transform {
            alpha: self.alpha * inner.alpha,
            translation: (
                self.translation.0 + inner.translation.0,
                self.translation.1 + inner.translation.1,
            ),
            window: self.window.intersect(&inner.window),
            volume: ((self.volume as u32 * inner.volume as u32) / 255).min(255) as u16,
        }
    }
}

/// A concrete image + audio payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub width: usize,
    pub height: usize,
    /// BGRA bytes, `width * height * 4`
    pub data: Vec<u8>,
    /// Interleaved S32 audio for this frame's cadence slot
    pub audio: AudioBuffer,
    pub interlaced: bool,
    pub top_field_first: bool,
    /// Recorder timecode when the source carries one
    pub timecode: Option<i32>,
}

impl ImageFrame {
    /// Pixel at (x, y) as BGRA bytes.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * self.width + x) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// A frame flowing from producers to the mixer.
#[derive(Debug, Clone)]
pub enum Frame {
    /// End of stream; sticky once returned by a producer
    Eos,
    /// Nothing to show this tick
    Empty,
    /// Leaf payload
    Image(Arc<ImageFrame>),
    /// Ordered children; index order is compositing order (bottom first)
    Group(Vec<Frame>),
    /// Child with a transform applied on top of its own
    Transformed(Box<Frame>, Transform),
}

impl Frame {
    pub fn eos() -> Frame {
        Frame::Eos
    }

    pub fn empty() -> Frame {
        Frame::Empty
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, Frame::Eos)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Frame::Empty)
    }

    /// Wrap this frame in a transform.
    pub fn transformed(self, transform: Transform) -> Frame {
        Frame::Transformed(Box::new(self), transform)
    }
}

/// The per-tick composite handed to consumers: one image plane of the
/// channel geometry plus one cadence slot of mixed audio.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFrame {
    pub width: usize,
    pub height: usize,
    /// BGRA bytes
    pub image: Vec<u8>,
    /// Interleaved S32 audio
    pub audio: AudioBuffer,
    pub timecode: Option<i32>,
}

/// Creates blank write-frames of the channel format and owns the
/// host-buffer pool producers allocate through.
#[derive(Debug)]
pub struct FrameFactory {
    desc: VideoFormatDesc,
    pool: HostBufferPool,
}

impl FrameFactory {
    pub fn new(desc: VideoFormatDesc) -> Arc<FrameFactory> {
        Arc::new(FrameFactory { desc, pool: HostBufferPool::new() })
    }

    pub fn desc(&self) -> &VideoFormatDesc {
        &self.desc
    }

    pub fn pool(&self) -> &HostBufferPool {
        &self.pool
    }

    /// A black, silent frame of the channel geometry.
    pub fn blank_frame(&self) -> Arc<ImageFrame> {
        let size = self.desc.width * self.desc.height * 4;
        let mut buffer = self.pool.take(size, Usage::WriteOnly);
        buffer.bind();
        // Pool buffers come back zeroed; mapping asserts the upload contract.
        let data = buffer.map().map(|bytes| bytes.to_vec()).unwrap_or_else(|_| vec![0; size]);
        buffer.unmap();
        buffer.unbind();
        self.pool.give_back(buffer);

        Arc::new(ImageFrame {
            width: self.desc.width,
            height: self.desc.height,
            data,
            audio: AudioBuffer::new(),
            interlaced: self.desc.field_mode.is_interlaced(),
            top_field_first: self.desc.field_mode == playout_common::FieldMode::Upper,
            timecode: None,
        })
    }

    /// Build a write-frame from decoded BGRA data, validating geometry.
    pub fn create_frame(
        &self,
        width: usize,
        height: usize,
        data: Vec<u8>,
        audio: AudioBuffer,
        interlaced: bool,
        top_field_first: bool,
        timecode: Option<i32>,
    ) -> Result<Arc<ImageFrame>> {
        if data.len() != width * height * 4 {
            return Err(Error::Config(format!(
                "frame data size {} does not match {width}x{height} BGRA",
                data.len()
            )));
        }
        Ok(Arc::new(ImageFrame {
            width,
            height,
            data,
            audio,
            interlaced,
            top_field_first,
            timecode,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_common::VideoFormatDesc;

    #[test]
    fn transform_composition() {
        let outer = Transform::default().with_alpha(0.5).with_translation(0.25, 0.0);
        let inner = Transform::default().with_alpha(0.5).with_volume(128);

        let combined = outer.combined(&inner);
        assert_eq!(combined.alpha, 0.25);
        assert_eq!(combined.translation, (0.25, 0.0));
        assert_eq!(combined.volume, 128);
    }

    #[test]
    fn window_intersection() {
        let a = TexWindow { x0: 0.0, y0: 0.0, x1: 0.5, y1: 1.0 };
        let b = TexWindow { x0: 0.25, y0: 0.0, x1: 1.0, y1: 1.0 };
        let c = a.intersect(&b);
        assert_eq!(c.x0, 0.25);
        assert_eq!(c.x1, 0.5);
    }

    #[test]
    fn blank_frame_matches_format() {
        let factory = FrameFactory::new(VideoFormatDesc::find("pal").unwrap());
        let frame = factory.blank_frame();
        assert_eq!(frame.width, 720);
        assert_eq!(frame.height, 576);
        assert!(frame.data.iter().all(|&b| b == 0));
        assert!(frame.interlaced);
        assert!(frame.top_field_first);
    }

    #[test]
    fn create_frame_validates_size() {
        let factory = FrameFactory::new(VideoFormatDesc::find("pal").unwrap());
        let err = factory.create_frame(10, 10, vec![0; 16], Vec::new(), false, false, None);
        assert!(err.is_err());
    }

    #[test]
    fn sentinels() {
        assert!(Frame::eos().is_eos());
        assert!(Frame::empty().is_empty());
        assert!(!Frame::empty().is_eos());
    }
}
