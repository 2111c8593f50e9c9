//! Channel video format descriptors
//!
//! A channel runs at a fixed video format: frame geometry, field mode, frame
//! rate expressed as a `time_scale / duration` rational, and the audio cadence
//! that maps the 48 kHz sample clock onto the frame clock.
//!
//! For NTSC-family rates (`duration == 1001`) the sample count per frame is
//! not an integer, so the cadence is a repeating pattern such as
//! `1602, 1601, 1602, 1601, 1602` whose sum over one pattern period is exactly
//! one second of audio.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Audio sample rate used by every channel format.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Number of audio channels carried by composite frames.
pub const AUDIO_CHANNELS: usize = 2;

/// Field mode of a frame or a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldMode {
    /// Full frames, no fields
    Progressive,
    /// Interlaced, top field first
    Upper,
    /// Interlaced, bottom field first
    Lower,
}

impl FieldMode {
    pub fn is_interlaced(self) -> bool {
        !matches!(self, FieldMode::Progressive)
    }
}

/// Well-known channel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFormat {
    Pal,
    Ntsc,
    X576p2500,
    X720p5000,
    X720p5994,
    X1080i5000,
    X1080i5994,
    X1080p2500,
    X1080p2997,
    X1080p5000,
}

/// Full description of a channel format.
///
/// `fps()` is the channel *tick* rate: interlaced formats tick once per woven
/// frame (two fields), so 1080i50 ticks at 25.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormatDesc {
    pub format: VideoFormat,
    pub width: usize,
    pub height: usize,
    pub field_mode: FieldMode,
    /// Frame duration numerator (e.g. 1001 for NTSC rates)
    pub duration: u64,
    /// Frame duration denominator (e.g. 30000 for 29.97)
    pub time_scale: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: usize,
    /// Per-frame audio sample counts, repeating
    pub audio_cadence: Vec<usize>,
}

impl VideoFormatDesc {
    fn new(
        format: VideoFormat,
        width: usize,
        height: usize,
        field_mode: FieldMode,
        time_scale: u64,
        duration: u64,
    ) -> Self {
        VideoFormatDesc {
            format,
            width,
            height,
            field_mode,
            duration,
            time_scale,
            audio_sample_rate: AUDIO_SAMPLE_RATE,
            audio_channels: AUDIO_CHANNELS,
            audio_cadence: audio_cadence(AUDIO_SAMPLE_RATE, time_scale, duration),
        }
    }

    /// Channel frame rate in frames per second.
    pub fn fps(&self) -> f64 {
        self.time_scale as f64 / self.duration as f64
    }

    /// Duration of one channel tick.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.duration * 1_000_000_000 / self.time_scale)
    }

    /// Look up a format descriptor by its conventional name (case-insensitive).
    pub fn find(name: &str) -> Result<VideoFormatDesc> {
        let desc = match name.to_ascii_lowercase().as_str() {
            "pal" => Self::new(VideoFormat::Pal, 720, 576, FieldMode::Upper, 25, 1),
            "ntsc" => Self::new(VideoFormat::Ntsc, 720, 486, FieldMode::Lower, 30_000, 1001),
            "576p2500" => Self::new(VideoFormat::X576p2500, 720, 576, FieldMode::Progressive, 25, 1),
            "720p5000" => {
                Self::new(VideoFormat::X720p5000, 1280, 720, FieldMode::Progressive, 50, 1)
            }
            "720p5994" => Self::new(
                VideoFormat::X720p5994,
                1280,
                720,
                FieldMode::Progressive,
                60_000,
                1001,
            ),
            "1080i5000" => {
                Self::new(VideoFormat::X1080i5000, 1920, 1080, FieldMode::Upper, 25, 1)
            }
            "1080i5994" => Self::new(
                VideoFormat::X1080i5994,
                1920,
                1080,
                FieldMode::Upper,
                30_000,
                1001,
            ),
            "1080p2500" => Self::new(
                VideoFormat::X1080p2500,
                1920,
                1080,
                FieldMode::Progressive,
                25,
                1,
            ),
            "1080p2997" => Self::new(
                VideoFormat::X1080p2997,
                1920,
                1080,
                FieldMode::Progressive,
                30_000,
                1001,
            ),
            "1080p5000" => Self::new(
                VideoFormat::X1080p5000,
                1920,
                1080,
                FieldMode::Progressive,
                50,
                1,
            ),
            other => return Err(Error::UnknownFormat(other.to_string())),
        };
        Ok(desc)
    }

    /// Samples per frame averaged over one cadence period.
    pub fn average_samples_per_frame(&self) -> f64 {
        let sum: usize = self.audio_cadence.iter().sum();
        sum as f64 / self.audio_cadence.len() as f64
    }
}

/// Compute the per-frame audio cadence for a frame rate.
///
/// Integer frame rates yield a single flat entry (e.g. 1920 for 25 fps).
/// Fractional rates distribute the remainder over the smallest repeating
/// period, rounding each partial sum so the pattern total is exact:
/// 29.97 fps yields `1602, 1601, 1602, 1601, 1602`.
pub fn audio_cadence(sample_rate: u32, time_scale: u64, duration: u64) -> Vec<usize> {
    let samples_per_period = sample_rate as u64 * duration; // over `time_scale` frames
    if samples_per_period % time_scale == 0 {
        return vec![(samples_per_period / time_scale) as usize];
    }

    // Smallest repeating period: time_scale / gcd frames per pattern.
    let g = gcd(samples_per_period, time_scale);
    let frames = (time_scale / g) as usize;
    let per_frame = samples_per_period as f64 / time_scale as f64;

    let mut cadence = Vec::with_capacity(frames);
    let mut last = 0i64;
    for i in 1..=frames {
        let next = (i as f64 * per_frame).round() as i64;
        cadence.push((next - last) as usize);
        last = next;
    }
    cadence
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}
