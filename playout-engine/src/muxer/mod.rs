//! Frame muxer
//!
//! Decouples a source's natural frame rate, field order and audio rate from
//! the channel's fixed cadence. Demultiplexed video frames and audio sample
//! chunks are pushed in, composite-ready frames are polled out.
//!
//! Both lanes are queues-of-queues: the outer queue separates stream epochs
//! (runs of same-format frames delimited by flush markers), the inner queue
//! holds the current epoch's material. Epochs are drained in lockstep — when
//! both lanes have a newer epoch and the current one cannot be completed,
//! both current epochs are dropped together and the truncation is logged.
//!
//! On the first frame of an epoch (and whenever the source format changes)
//! the muxer classifies a display mode from the source/channel rate and
//! field-order pair, appending deinterlace/scale steps to its filter chain
//! as needed.

pub mod filter;

use std::collections::VecDeque;
use std::sync::Arc;

use playout_common::format::FieldMode;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameFactory, ImageFrame};
use crate::muxer::filter::{append_filter, FilterChain};

/// Raw decoded picture handed to the muxer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub width: usize,
    pub height: usize,
    /// BGRA bytes
    pub data: Vec<u8>,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub timecode: Option<i32>,
}

impl DecodedFrame {
    /// Metadata-only copy for struct-update construction.
    pub(crate) fn shallow_meta(&self) -> DecodedFrame {
        DecodedFrame {
            width: self.width,
            height: self.height,
            data: Vec::new(),
            interlaced: self.interlaced,
            top_field_first: self.top_field_first,
            timecode: self.timecode,
        }
    }
}

/// Video lane input.
#[derive(Debug)]
pub enum VideoInput {
    Frame(DecodedFrame),
    /// Epoch boundary: the source flushed or reconfigured
    Flush,
    /// A present-but-blank frame (audio-only sources)
    Empty,
}

/// Audio lane input (interleaved S32).
#[derive(Debug)]
pub enum AudioInput {
    Samples(Vec<i32>),
    Flush,
    /// One cadence slot of silence
    Empty,
}

/// How one source frame maps to channel output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Simple,
    /// One source frame emitted twice, each with its own cadence slot
    Duplicate,
    /// Two source frames consumed, the first emitted
    Half,
    /// Two source frames woven into one interlaced output
    Interlace,
    Deinterlace,
    /// Field-rate deinterlace: two progressive outputs per source frame
    DeinterlaceBob,
    /// Two interlaced source frames scaled per-field then woven
    ScaleInterlaced,
    Invalid,
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DisplayMode::Simple => "simple",
            DisplayMode::Duplicate => "duplicate",
            DisplayMode::Half => "half",
            DisplayMode::Interlace => "interlace",
            DisplayMode::Deinterlace => "deinterlace",
            DisplayMode::DeinterlaceBob => "deinterlace-bob",
            DisplayMode::ScaleInterlaced => "scale-interlaced",
            DisplayMode::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Classify the cadence relation between a source and the channel.
///
/// Rates are compared with a 2 fps tolerance so 23.976/25 and 29.97/30
/// family pairings land in the intended bucket.
pub fn get_display_mode(
    in_mode: FieldMode,
    in_fps: f64,
    out_mode: FieldMode,
    out_fps: f64,
) -> DisplayMode {
    const EPSILON: f64 = 2.0;

    if (in_fps - out_fps).abs() < EPSILON {
        if in_mode.is_interlaced() && !out_mode.is_interlaced() {
            DisplayMode::Deinterlace
        } else if !in_mode.is_interlaced() && out_mode.is_interlaced() {
            DisplayMode::Interlace
        } else {
            DisplayMode::Simple
        }
    } else if (in_fps / 2.0 - out_fps).abs() < EPSILON {
        if in_mode.is_interlaced() {
            DisplayMode::Invalid
        } else if out_mode.is_interlaced() {
            DisplayMode::Interlace
        } else {
            DisplayMode::Half
        }
    } else if (in_fps - out_fps / 2.0).abs() < EPSILON {
        if out_mode.is_interlaced() {
            DisplayMode::Invalid
        } else if in_mode.is_interlaced() {
            DisplayMode::DeinterlaceBob
        } else {
            DisplayMode::Duplicate
        }
    } else {
        DisplayMode::Invalid
    }
}

/// Maximum frames buffered in one video epoch before the feeder is declared
/// misconfigured.
const MAX_EPOCH_FRAMES: usize = 32;

/// Cadence adaptor between one source and the channel.
pub struct FrameMuxer {
    video_streams: VecDeque<VecDeque<ImageFrame>>,
    audio_streams: VecDeque<Vec<i32>>,
    frame_buffer: VecDeque<Frame>,
    display_mode: DisplayMode,
    in_fps: f64,
    factory: Arc<FrameFactory>,
    /// Rotated one step at construction so the short slot lands where the
    /// mixer expects it
    audio_cadence: Vec<usize>,
    filter: Option<FilterChain>,
    filter_str: String,
    is_mxf: bool,
    print_name: String,
}

impl FrameMuxer {
    pub fn new(
        in_fps: f64,
        factory: Arc<FrameFactory>,
        filter_str: &str,
        is_mxf: bool,
    ) -> FrameMuxer {
        let mut audio_cadence = factory.desc().audio_cadence.clone();
        audio_cadence.rotate_right(1);

        let mut muxer = FrameMuxer {
            video_streams: VecDeque::new(),
            audio_streams: VecDeque::new(),
            frame_buffer: VecDeque::new(),
            display_mode: DisplayMode::Invalid,
            in_fps,
            factory,
            audio_cadence,
            filter: None,
            filter_str: filter_str.to_ascii_lowercase(),
            is_mxf,
            print_name: format!("frame-muxer[{in_fps:.3}]"),
        };
        muxer.video_streams.push_back(VecDeque::new());
        muxer.audio_streams.push_back(Vec::new());
        muxer
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    /// Current filter expression (after display-mode appends).
    pub fn filter_expression(&self) -> Option<&str> {
        self.filter.as_ref().map(FilterChain::expression)
    }

    pub fn print_name(&self) -> &str {
        &self.print_name
    }

    /// Feed the video lane.
    pub fn push_video(&mut self, input: VideoInput) -> Result<()> {
        match input {
            VideoInput::Flush => {
                self.video_streams.push_back(VecDeque::new());
                trace!("{}: video flush", self.print_name);
            }
            VideoInput::Empty => {
                let blank = (*self.factory.blank_frame()).clone();
                self.video_streams.back_mut().expect("epoch always present").push_back(blank);
                self.display_mode = DisplayMode::Simple;
                trace!("{}: empty video", self.print_name);
            }
            VideoInput::Frame(frame) => {
                let format_changed = self
                    .filter
                    .as_ref()
                    .is_some_and(|filter| filter.is_format_changed(&frame));
                if format_changed {
                    debug!(
                        "{}: frame format changed to {}x{}, resetting display mode",
                        self.print_name, frame.width, frame.height
                    );
                    self.display_mode = DisplayMode::Invalid;
                }

                if self.filter.is_none() || self.display_mode == DisplayMode::Invalid {
                    self.update_display_mode(&frame)?;
                }

                let filter = self.filter.as_mut().expect("configured above");
                filter.push(frame)?;
                for converted in filter.poll_all() {
                    let write_frame = self.make_write_frame(converted)?;
                    self.video_streams
                        .back_mut()
                        .expect("epoch always present")
                        .push_back(write_frame);
                }
            }
        }

        if self.video_streams.back().expect("epoch always present").len() > MAX_EPOCH_FRAMES {
            return Err(Error::MuxerOverflow {
                print_name: self.print_name.clone(),
                stream: "video",
            });
        }
        Ok(())
    }

    /// Feed the audio lane.
    pub fn push_audio(&mut self, input: AudioInput) -> Result<()> {
        let channels = self.factory.desc().audio_channels;
        match input {
            AudioInput::Flush => {
                self.audio_streams.push_back(Vec::new());
                trace!("{}: audio flush", self.print_name);
            }
            AudioInput::Empty => {
                let slot = self.audio_cadence[0] * channels;
                self.audio_streams
                    .back_mut()
                    .expect("epoch always present")
                    .extend(std::iter::repeat(0).take(slot));
            }
            AudioInput::Samples(samples) => {
                self.audio_streams
                    .back_mut()
                    .expect("epoch always present")
                    .extend(samples);
            }
        }

        let limit = MAX_EPOCH_FRAMES * self.audio_cadence[0] * channels;
        if self.audio_streams.back().expect("epoch always present").len() > limit {
            return Err(Error::MuxerOverflow {
                print_name: self.print_name.clone(),
                stream: "audio",
            });
        }
        Ok(())
    }

    /// True when the video lane can contribute to one output.
    pub fn video_ready(&self) -> bool {
        self.video_streams.len() > 1
            || (self.video_streams.len() >= self.audio_streams.len() && self.video_ready_inner())
    }

    /// True when the audio lane can contribute to one output.
    pub fn audio_ready(&self) -> bool {
        self.audio_streams.len() > 1
            || (self.audio_streams.len() >= self.video_streams.len() && self.audio_ready_inner())
    }

    fn video_ready_inner(&self) -> bool {
        let available = self.video_streams.front().map_or(0, VecDeque::len);
        match self.display_mode {
            DisplayMode::Interlace | DisplayMode::ScaleInterlaced | DisplayMode::Half => {
                available >= 2
            }
            _ => available >= 1,
        }
    }

    fn audio_ready_inner(&self) -> bool {
        let channels = self.factory.desc().audio_channels;
        let needed = self.audio_cadence[0] * channels;
        let available = self.audio_streams.front().map_or(0, Vec::len);
        match self.display_mode {
            DisplayMode::Duplicate => available / 2 >= needed,
            _ => available >= needed,
        }
    }

    /// Emit the next composite-ready frame, or `None` when more input is
    /// needed.
    pub fn poll(&mut self) -> Option<Frame> {
        if let Some(frame) = self.frame_buffer.pop_front() {
            return Some(frame);
        }

        // Lockstep truncation: both lanes have moved on and the current
        // epoch can never be completed.
        if self.video_streams.len() > 1
            && self.audio_streams.len() > 1
            && (!self.video_ready_inner() || !self.audio_ready_inner())
        {
            let stale_video = self.video_streams.front().map_or(0, VecDeque::len);
            let stale_audio = self.audio_streams.front().map_or(0, Vec::len);
            if stale_video > 0 || stale_audio > 0 {
                debug!(
                    "{}: truncating epoch, dropping {stale_video} video-frames and {stale_audio} audio-samples",
                    self.print_name
                );
            }
            self.video_streams.pop_front();
            self.audio_streams.pop_front();
        }

        if !self.video_ready_inner()
            || !self.audio_ready_inner()
            || self.display_mode == DisplayMode::Invalid
        {
            return None;
        }

        let mut first = self.pop_video();
        first.audio = self.pop_audio();

        match self.display_mode {
            DisplayMode::Simple
            | DisplayMode::Deinterlace
            | DisplayMode::DeinterlaceBob
            | DisplayMode::Invalid => {
                self.frame_buffer.push_back(Frame::Image(Arc::new(first)));
            }
            DisplayMode::Interlace | DisplayMode::ScaleInterlaced => {
                let second = self.pop_video();
                let woven = weave(&first, &second, self.factory.desc().field_mode);
                self.frame_buffer.push_back(Frame::Image(Arc::new(woven)));
            }
            DisplayMode::Duplicate => {
                let mut second = first.clone();
                second.audio = self.pop_audio();
                self.frame_buffer.push_back(Frame::Image(Arc::new(first)));
                self.frame_buffer.push_back(Frame::Image(Arc::new(second)));
            }
            DisplayMode::Half => {
                self.pop_video(); // Partner frame is discarded.
                self.frame_buffer.push_back(Frame::Image(Arc::new(first)));
            }
        }

        self.frame_buffer.pop_front()
    }

    /// Drop all buffered material and start a fresh epoch.
    pub fn clear(&mut self) {
        self.video_streams.clear();
        self.audio_streams.clear();
        self.frame_buffer.clear();
        if let Some(filter) = &mut self.filter {
            filter.clear();
        }
        self.video_streams.push_back(VecDeque::new());
        self.audio_streams.push_back(Vec::new());
    }

    fn pop_video(&mut self) -> ImageFrame {
        self.video_streams
            .front_mut()
            .and_then(VecDeque::pop_front)
            .expect("caller checked video_ready_inner")
    }

    fn pop_audio(&mut self) -> Vec<i32> {
        let channels = self.factory.desc().audio_channels;
        let take = self.audio_cadence[0] * channels;
        let front = self.audio_streams.front_mut().expect("epoch always present");
        debug_assert!(front.len() >= take, "caller checked audio_ready_inner");
        let samples: Vec<i32> = front.drain(..take.min(front.len())).collect();
        self.audio_cadence.rotate_left(1);
        samples
    }

    fn make_write_frame(&self, frame: DecodedFrame) -> Result<ImageFrame> {
        let arc = self.factory.create_frame(
            frame.width,
            frame.height,
            frame.data,
            Vec::new(),
            frame.interlaced,
            frame.top_field_first,
            frame.timecode,
        )?;
        Ok(Arc::try_unwrap(arc).unwrap_or_else(|arc| (*arc).clone()))
    }

    fn update_display_mode(&mut self, frame: &DecodedFrame) -> Result<()> {
        let desc = self.factory.desc().clone();
        let mut filter_str = self.filter_str.clone();

        let mut source_mode = if frame.interlaced {
            if frame.top_field_first { FieldMode::Upper } else { FieldMode::Lower }
        } else {
            FieldMode::Progressive
        };

        // SD sources claiming progressive are usually mislabeled interlaced.
        if source_mode == FieldMode::Progressive && frame.height < 720 && self.in_fps < 50.0 {
            source_mode = FieldMode::Upper;
        }

        let mut mode = get_display_mode(source_mode, self.in_fps, desc.field_mode, desc.fps());

        // Geometry mismatch on an interlaced pairing needs per-field scaling,
        // except NTSC DV (480 in a 486 channel) and IMX (cropped below).
        if !(frame.height == 480 && desc.height == 486)
            && mode == DisplayMode::Simple
            && source_mode != FieldMode::Progressive
            && desc.field_mode != FieldMode::Progressive
            && frame.height != desc.height
            && !(frame.width == 720 && frame.height == 608 && desc.height == 576)
        {
            mode = DisplayMode::ScaleInterlaced;
        }

        // IMX frames carry 32 VBI lines above the active picture.
        if self.is_mxf && frame.width == 720 && frame.height == 608 {
            filter_str = append_filter(&filter_str, "crop=720:576:0:32");
        }

        match mode {
            DisplayMode::Deinterlace => filter_str = append_filter(&filter_str, "yadif=0:-1"),
            DisplayMode::DeinterlaceBob => filter_str = append_filter(&filter_str, "yadif=1:-1"),
            DisplayMode::ScaleInterlaced => {
                filter_str = append_filter(
                    &filter_str,
                    &format!("scale=w={}:h={}:interl=1", desc.width, desc.height),
                );
            }
            _ => {}
        }

        if mode == DisplayMode::Invalid {
            debug!("{}: failed to classify display mode, falling back to simple", self.print_name);
            mode = DisplayMode::Simple;
        }

        self.display_mode = mode;
        self.filter = Some(FilterChain::new(frame.width, frame.height, &filter_str)?);

        debug!(
            "{}: {mode} for {}x{} {} @ {:.3} fps into {}",
            self.print_name,
            frame.width,
            frame.height,
            if frame.interlaced { "interlaced" } else { "progressive" },
            self.in_fps,
            desc.fps(),
        );
        Ok(())
    }
}

/// Weave two source frames into one interlaced output frame. With an upper
/// channel the first frame supplies the top field (even rows).
fn weave(first: &ImageFrame, second: &ImageFrame, field_mode: FieldMode) -> ImageFrame {
    let width = first.width;
    let height = first.height;
    let row_bytes = width * 4;
    let mut data = vec![0u8; width * height * 4];

    let (even_source, odd_source) = match field_mode {
        FieldMode::Lower => (second, first),
        _ => (first, second),
    };

    for row in 0..height {
        let source = if row % 2 == 0 { even_source } else { odd_source };
        if row < source.height {
            data[row * row_bytes..(row + 1) * row_bytes]
                .copy_from_slice(&source.data[row * row_bytes..(row + 1) * row_bytes]);
        }
    }

    ImageFrame {
        width,
        height,
        data,
        audio: first.audio.clone(),
        interlaced: true,
        top_field_first: field_mode == FieldMode::Upper,
        timecode: first.timecode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_common::VideoFormatDesc;

    fn factory(name: &str) -> Arc<FrameFactory> {
        FrameFactory::new(VideoFormatDesc::find(name).unwrap())
    }

    fn source_frame(width: usize, height: usize, fill: u8, interlaced: bool) -> DecodedFrame {
        DecodedFrame {
            width,
            height,
            data: vec![fill; width * height * 4],
            interlaced,
            top_field_first: interlaced,
            timecode: None,
        }
    }

    fn image(frame: Frame) -> Arc<ImageFrame> {
        match frame {
            Frame::Image(image) => image,
            other => panic!("expected image frame, got {other:?}"),
        }
    }

    fn push_cadence_audio(muxer: &mut FrameMuxer, slots: usize) {
        // Generous audio so readiness is driven by video in these tests.
        let desc_channels = 2;
        for _ in 0..slots {
            muxer
                .push_audio(AudioInput::Samples(vec![1i32; 1920 * desc_channels]))
                .unwrap();
        }
    }

    #[test]
    fn matched_rate_same_mode_is_one_to_one() {
        // 720p50 source into a 720p50 channel: simple, one output per input.
        let mut muxer = FrameMuxer::new(50.0, factory("720p5000"), "", false);
        for i in 0..3 {
            muxer
                .push_video(VideoInput::Frame(source_frame(1280, 720, i as u8, false)))
                .unwrap();
            muxer.push_audio(AudioInput::Samples(vec![0i32; 960 * 2])).unwrap();
        }
        assert_eq!(muxer.display_mode(), DisplayMode::Simple);

        for i in 0..3 {
            let out = image(muxer.poll().expect("one output per input"));
            assert_eq!(out.data[0], i as u8);
            assert_eq!(out.audio.len(), 960 * 2);
        }
        assert!(muxer.poll().is_none());
    }

    #[test]
    fn progressive_double_rate_into_interlaced_weaves_pairs() {
        // 59.94p source into a 29.97i (upper) channel: interlace mode,
        // upper field from input 2k, lower field from input 2k+1.
        let mut muxer = FrameMuxer::new(59.94, factory("1080i5994"), "", false);

        for i in 0..4u8 {
            muxer
                .push_video(VideoInput::Frame(source_frame(1920, 1080, 10 + i, false)))
                .unwrap();
        }
        push_cadence_audio(&mut muxer, 2);
        assert_eq!(muxer.display_mode(), DisplayMode::Interlace);

        let first = image(muxer.poll().expect("two inputs make one output"));
        assert!(first.interlaced);
        assert!(first.top_field_first);
        assert_eq!(first.pixel(0, 0)[0], 10); // even row from input 0
        assert_eq!(first.pixel(0, 1)[0], 11); // odd row from input 1

        let second = image(muxer.poll().expect("second pair"));
        assert_eq!(second.pixel(0, 0)[0], 12);
        assert_eq!(second.pixel(0, 1)[0], 13);
    }

    #[test]
    fn sd_progressive_into_hd_interlaced_scales_per_field() {
        // 23.976 "progressive" SD is treated as mislabeled upper-field
        // material; a 1080i50 channel then needs per-field scaling.
        let mut muxer = FrameMuxer::new(23.976, factory("1080i5000"), "", false);

        for _ in 0..2 {
            muxer
                .push_video(VideoInput::Frame(source_frame(720, 576, 60, false)))
                .unwrap();
        }
        push_cadence_audio(&mut muxer, 1);

        assert_eq!(muxer.display_mode(), DisplayMode::ScaleInterlaced);
        assert_eq!(
            muxer.filter_expression(),
            Some("scale=w=1920:h=1080:interl=1")
        );

        let out = image(muxer.poll().expect("pair weaves into one frame"));
        assert_eq!((out.width, out.height), (1920, 1080));
    }

    #[test]
    fn duplicate_emits_twice_with_own_audio_slots() {
        // 29.97p source into a 59.94p channel: each frame shown twice and
        // each copy consumes its own cadence slot.
        let mut muxer = FrameMuxer::new(29.97, factory("720p5994"), "", false);

        muxer
            .push_video(VideoInput::Frame(source_frame(1280, 720, 42, false)))
            .unwrap();
        push_cadence_audio(&mut muxer, 2);
        assert_eq!(muxer.display_mode(), DisplayMode::Duplicate);

        let first = image(muxer.poll().expect("first copy"));
        let second = image(muxer.poll().expect("second copy"));
        assert_eq!(first.data, second.data);
        assert!(!first.audio.is_empty());
        assert!(!second.audio.is_empty());
        assert_ne!(first.audio.len() + second.audio.len(), 0);
    }

    #[test]
    fn half_drops_every_other_frame() {
        // 50p source into a 25p channel.
        let mut muxer = FrameMuxer::new(50.0, factory("1080p2500"), "", false);

        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 1, false)))
            .unwrap();
        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 2, false)))
            .unwrap();
        push_cadence_audio(&mut muxer, 1);
        assert_eq!(muxer.display_mode(), DisplayMode::Half);

        let out = image(muxer.poll().expect("pair yields one frame"));
        assert_eq!(out.data[0], 1);
        assert!(muxer.poll().is_none());
    }

    #[test]
    fn interlaced_into_progressive_deinterlaces() {
        let mut muxer = FrameMuxer::new(25.0, factory("1080p2500"), "", false);
        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 5, true)))
            .unwrap();
        assert_eq!(muxer.display_mode(), DisplayMode::Deinterlace);
        assert_eq!(muxer.filter_expression(), Some("yadif=0:-1"));
    }

    #[test]
    fn imx_mxf_frames_are_cropped() {
        let mut muxer = FrameMuxer::new(25.0, factory("pal"), "", true);
        muxer
            .push_video(VideoInput::Frame(source_frame(720, 608, 8, true)))
            .unwrap();
        push_cadence_audio(&mut muxer, 1);

        assert_eq!(muxer.filter_expression(), Some("crop=720:576:0:32"));
        let out = image(muxer.poll().expect("cropped frame"));
        assert_eq!((out.width, out.height), (720, 576));
    }

    #[test]
    fn ntsc_cadence_rotates_through_the_ring() {
        let mut muxer = FrameMuxer::new(29.97, factory("ntsc"), "", false);

        for i in 0..5u8 {
            muxer
                .push_video(VideoInput::Frame(source_frame(720, 486, i, true)))
                .unwrap();
        }
        muxer.push_audio(AudioInput::Samples(vec![0i32; 8008 * 2])).unwrap();

        let mut counts = Vec::new();
        while let Some(frame) = muxer.poll() {
            counts.push(image(frame).audio.len() / 2);
        }
        // One-step-rotated NTSC pattern; any 5 consecutive emits sum to the
        // exact 8008-sample period.
        assert_eq!(counts, vec![1602, 1602, 1601, 1602, 1601]);
        assert_eq!(counts.iter().sum::<usize>(), 8008);
    }

    #[test]
    fn readiness_tracks_both_lanes() {
        let mut muxer = FrameMuxer::new(50.0, factory("720p5000"), "", false);
        assert!(!muxer.video_ready());

        muxer
            .push_video(VideoInput::Frame(source_frame(1280, 720, 0, false)))
            .unwrap();
        assert!(muxer.video_ready());
        assert!(!muxer.audio_ready());
        assert!(muxer.poll().is_none());

        muxer.push_audio(AudioInput::Samples(vec![0i32; 960 * 2])).unwrap();
        assert!(muxer.audio_ready());
        assert!(muxer.poll().is_some());
    }

    #[test]
    fn clear_discards_buffered_material() {
        let mut muxer = FrameMuxer::new(50.0, factory("720p5000"), "", false);
        muxer
            .push_video(VideoInput::Frame(source_frame(1280, 720, 0, false)))
            .unwrap();
        muxer.push_audio(AudioInput::Samples(vec![0i32; 960 * 2])).unwrap();

        muxer.clear();
        assert!(muxer.poll().is_none());
        assert!(!muxer.video_ready());
    }

    #[test]
    fn video_overflow_is_fatal() {
        let mut muxer = FrameMuxer::new(50.0, factory("720p5000"), "", false);
        let mut result = Ok(());
        for _ in 0..40 {
            result = muxer.push_video(VideoInput::Frame(source_frame(1280, 720, 0, false)));
            if result.is_err() {
                break;
            }
        }
        let err = result.unwrap_err();
        assert!(err.to_string().contains("video-stream overflow"));
    }

    #[test]
    fn audio_overflow_is_fatal() {
        let mut muxer = FrameMuxer::new(50.0, factory("720p5000"), "", false);
        let mut result = Ok(());
        for _ in 0..80 {
            result = muxer.push_audio(AudioInput::Samples(vec![0i32; 960 * 2 * 2]));
            if result.is_err() {
                break;
            }
        }
        let err = result.unwrap_err();
        assert!(err.to_string().contains("audio-stream overflow"));
    }

    #[test]
    fn lockstep_truncation_drops_incomplete_epochs_together() {
        let mut muxer = FrameMuxer::new(50.0, factory("1080p2500"), "", false);

        // Half mode needs two frames; strand one in the first epoch.
        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 9, false)))
            .unwrap();
        muxer.push_audio(AudioInput::Samples(vec![0i32; 100])).unwrap();
        muxer.push_video(VideoInput::Flush).unwrap();
        muxer.push_audio(AudioInput::Flush).unwrap();

        // New epoch with complete material.
        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 20, false)))
            .unwrap();
        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 21, false)))
            .unwrap();
        push_cadence_audio(&mut muxer, 1);

        let out = image(muxer.poll().expect("new epoch emits after truncation"));
        assert_eq!(out.data[0], 20);
    }

    #[test]
    fn format_change_resets_classification() {
        let mut muxer = FrameMuxer::new(50.0, factory("720p5000"), "", false);
        muxer
            .push_video(VideoInput::Frame(source_frame(1280, 720, 1, false)))
            .unwrap();
        assert_eq!(muxer.display_mode(), DisplayMode::Simple);

        // Same muxer, new geometry: reclassified instead of mixed in.
        muxer
            .push_video(VideoInput::Frame(source_frame(1920, 1080, 2, false)))
            .unwrap();
        assert!(muxer.filter_expression().is_some());
    }

    #[test]
    fn empty_video_becomes_a_blank_simple_frame() {
        let mut muxer = FrameMuxer::new(25.0, factory("pal"), "", false);
        muxer.push_video(VideoInput::Empty).unwrap();
        muxer.push_audio(AudioInput::Empty).unwrap();

        assert_eq!(muxer.display_mode(), DisplayMode::Simple);
        let out = image(muxer.poll().expect("blank frame"));
        assert!(out.data.iter().all(|&b| b == 0));
        assert_eq!(out.audio.len(), 1920 * 2);
        assert!(out.audio.iter().all(|&s| s == 0));
    }
}
