//! Codec backend interface
//!
//! The encoder consumer drives real codec libraries only through the narrow
//! interface below: guess an output format from a filename, open encoders,
//! allocate streams in a container, encode frames into zero-or-one packets,
//! interleaved-write packets, write header/trailer, and flush delayed
//! codecs by encoding nothing.
//!
//! `RawBackend` is the built-in reference implementation: encoders emit
//! fixed-size digest packets and the container writes a self-describing
//! packet log, which keeps output files small, deterministic and easy to
//! assert on. Swapping in bindings to a production codec library is a
//! matter of implementing these traits.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

/// Exact rational, used for time bases and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Rational {
        Rational { num, den }
    }

    /// Rescale `value` from this time base into `to`, truncating.
    pub fn rescale(self, value: i64, to: Rational) -> i64 {
        value * self.num * to.den / (self.den * to.num)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra,
    Yuv420p,
    Yuv422p,
    /// Single luma plane; used for key (alpha) output
    Gray8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    S16Planar,
    F32,
    F32Planar,
}

impl SampleFormat {
    pub fn is_planar(self) -> bool {
        matches!(self, SampleFormat::S16Planar | SampleFormat::F32Planar)
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 | SampleFormat::S16Planar => 2,
            SampleFormat::F32 | SampleFormat::F32Planar => 4,
        }
    }
}

/// An encoded packet bound for the container.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
}

/// One picture handed to a video encoder.
#[derive(Debug)]
pub struct VideoPicture {
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    /// Planar pixel data; plane count depends on the format
    pub planes: Vec<Vec<u8>>,
    pub pts: i64,
    pub interlaced: bool,
    pub top_field_first: bool,
}

/// One run of samples handed to an audio encoder.
///
/// Interleaved formats use a single plane; planar formats one per channel.
#[derive(Debug)]
pub struct AudioChunk {
    pub planes: Vec<Vec<u8>>,
    pub samples: usize,
    pub pts: i64,
}

#[derive(Debug, Clone)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    /// 0 means codec default
    pub bit_rate: i64,
    pub rc_max_rate: i64,
    pub rc_min_rate: i64,
    pub rc_buffer_size: i64,
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub time_base: Rational,
    pub sample_aspect_ratio: Rational,
}

#[derive(Debug, Clone)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
    /// 0 means codec default
    pub bit_rate: i64,
}

/// A stream allocated inside a container.
#[derive(Debug, Clone, Copy)]
pub struct StreamDesc {
    pub index: usize,
    pub time_base: Rational,
}

pub trait VideoEncoder: Send {
    /// Encode one picture; a delayed codec may return no packet yet.
    fn encode(&mut self, picture: &VideoPicture) -> Result<Option<Packet>>;
    /// Drain one pending packet; `None` means fully drained.
    fn flush(&mut self) -> Result<Option<Packet>>;
    fn has_delay(&self) -> bool;
    fn time_base(&self) -> Rational;
    fn pixel_format(&self) -> PixelFormat;
}

pub trait AudioEncoder: Send {
    fn encode(&mut self, chunk: &AudioChunk) -> Result<Option<Packet>>;
    fn flush(&mut self) -> Result<Option<Packet>>;
    fn has_delay(&self) -> bool;
    fn time_base(&self) -> Rational;
    /// Samples per encoded frame; 0 when the codec takes any amount
    fn frame_size(&self) -> usize;
    fn sample_format(&self) -> SampleFormat;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> usize;
}

pub trait Container: Send {
    fn add_video_stream(&mut self, config: &VideoEncoderConfig) -> Result<StreamDesc>;
    fn add_audio_stream(&mut self, config: &AudioEncoderConfig) -> Result<StreamDesc>;
    /// Write the header. Returns the option keys the container did not
    /// recognize so the caller can log them.
    fn write_header(&mut self, options: &[(String, String)]) -> Result<Vec<String>>;
    fn write_interleaved(&mut self, packet: Packet) -> Result<()>;
    fn write_trailer(&mut self) -> Result<()>;
}

/// A guessed output container format.
#[derive(Debug, Clone)]
pub struct ContainerFormat {
    pub name: String,
    pub default_vcodec: String,
    pub default_acodec: String,
}

/// Factory for containers and encoders.
pub trait CodecBackend: Send + Sync {
    /// Guess a format from the filename, or resolve an explicit name.
    fn guess_format(&self, filename: &str, format_name: Option<&str>) -> Result<ContainerFormat>;
    fn open_container(&self, path: &Path, format: &ContainerFormat) -> Result<Box<dyn Container>>;
    fn open_video_encoder(&self, config: &VideoEncoderConfig) -> Result<Box<dyn VideoEncoder>>;
    fn open_audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Box<dyn AudioEncoder>>;
}

// ---------------------------------------------------------------------------
// Reference backend
// ---------------------------------------------------------------------------

const KNOWN_VIDEO_CODECS: &[&str] = &["libx264", "mpeg2video", "rawvideo"];
const KNOWN_AUDIO_CODECS: &[&str] = &["aac", "pcm_s16le", "rawaudio"];

/// Deterministic built-in backend writing digest-packet logs.
#[derive(Debug, Default)]
pub struct RawBackend;

impl CodecBackend for RawBackend {
    fn guess_format(&self, filename: &str, format_name: Option<&str>) -> Result<ContainerFormat> {
        if let Some(name) = format_name {
            return match name {
                "mxf_d10" => Ok(ContainerFormat {
                    name: "mxf_d10".into(),
                    default_vcodec: "mpeg2video".into(),
                    default_acodec: "pcm_s16le".into(),
                }),
                "mpegts" => Ok(ContainerFormat {
                    name: "mpegts".into(),
                    default_vcodec: "libx264".into(),
                    default_acodec: "aac".into(),
                }),
                other => Err(Error::Codec(format!("unknown container format '{other}'"))),
            };
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let format = match extension.as_str() {
            "mxf" => ContainerFormat {
                name: "mxf".into(),
                default_vcodec: "mpeg2video".into(),
                default_acodec: "pcm_s16le".into(),
            },
            "ts" => ContainerFormat {
                name: "mpegts".into(),
                default_vcodec: "libx264".into(),
                default_acodec: "aac".into(),
            },
            _ => ContainerFormat {
                name: "mp4".into(),
                default_vcodec: "libx264".into(),
                default_acodec: "aac".into(),
            },
        };
        Ok(format)
    }

    fn open_container(&self, path: &Path, format: &ContainerFormat) -> Result<Box<dyn Container>> {
        let file = File::create(path)?;
        // Transport streams carry a 90 kHz clock; file formats keep the
        // codec time base.
        let stream_time_base =
            if format.name == "mpegts" { Some(Rational::new(1, 90_000)) } else { None };
        Ok(Box::new(RawContainer {
            file,
            format: format.name.clone(),
            stream_time_base,
            streams: Vec::new(),
            header_written: false,
            packets_written: 0,
        }))
    }

    fn open_video_encoder(&self, config: &VideoEncoderConfig) -> Result<Box<dyn VideoEncoder>> {
        if !KNOWN_VIDEO_CODECS.contains(&config.codec.as_str()) {
            return Err(Error::Codec(format!("video codec '{}' not found", config.codec)));
        }
        if config.width == 0 || config.height == 0 {
            return Err(Error::Codec("unsupported video dimensions".into()));
        }
        // Model the real thing: an H.264 encoder holds a couple of frames.
        let delay = if config.codec == "libx264" { 2 } else { 0 };
        Ok(Box::new(RawVideoEncoder {
            config: config.clone(),
            delay,
            pending: std::collections::VecDeque::new(),
            frames_seen: 0,
        }))
    }

    fn open_audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Box<dyn AudioEncoder>> {
        if !KNOWN_AUDIO_CODECS.contains(&config.codec.as_str()) {
            return Err(Error::Codec(format!("audio codec '{}' not found", config.codec)));
        }
        let frame_size = if config.codec == "aac" { 1024 } else { 0 };
        Ok(Box::new(RawAudioEncoder { config: config.clone(), frame_size }))
    }
}

struct RawVideoEncoder {
    config: VideoEncoderConfig,
    delay: usize,
    pending: std::collections::VecDeque<Packet>,
    frames_seen: u64,
}

impl RawVideoEncoder {
    fn digest_packet(&mut self, picture: &VideoPicture) -> Packet {
        let mut data = Vec::with_capacity(32);
        data.extend_from_slice(&(picture.width as u32).to_le_bytes());
        data.extend_from_slice(&(picture.height as u32).to_le_bytes());
        data.push(match picture.pixel_format {
            PixelFormat::Bgra => 0,
            PixelFormat::Yuv420p => 1,
            PixelFormat::Yuv422p => 2,
            PixelFormat::Gray8 => 3,
        });
        data.push(u8::from(picture.interlaced));
        let mut hash = FNV_OFFSET;
        for plane in &picture.planes {
            hash = fnv1a(hash, plane);
        }
        data.extend_from_slice(&hash.to_le_bytes());

        let gop = self.config.gop_size.max(1) as u64;
        let keyframe = self.frames_seen % gop == 0;
        self.frames_seen += 1;

        Packet { stream_index: 0, data, pts: picture.pts, dts: picture.pts, keyframe }
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn encode(&mut self, picture: &VideoPicture) -> Result<Option<Packet>> {
        let packet = self.digest_packet(picture);
        self.pending.push_back(packet);
        if self.pending.len() > self.delay {
            Ok(self.pending.pop_front())
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self) -> Result<Option<Packet>> {
        Ok(self.pending.pop_front())
    }

    fn has_delay(&self) -> bool {
        self.delay > 0
    }

    fn time_base(&self) -> Rational {
        self.config.time_base
    }

    fn pixel_format(&self) -> PixelFormat {
        self.config.pixel_format
    }
}

struct RawAudioEncoder {
    config: AudioEncoderConfig,
    frame_size: usize,
}

impl AudioEncoder for RawAudioEncoder {
    fn encode(&mut self, chunk: &AudioChunk) -> Result<Option<Packet>> {
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&(chunk.samples as u32).to_le_bytes());
        let mut hash = FNV_OFFSET;
        for plane in &chunk.planes {
            hash = fnv1a(hash, plane);
        }
        data.extend_from_slice(&hash.to_le_bytes());
        Ok(Some(Packet { stream_index: 1, data, pts: chunk.pts, dts: chunk.pts, keyframe: true }))
    }

    fn flush(&mut self) -> Result<Option<Packet>> {
        Ok(None)
    }

    fn has_delay(&self) -> bool {
        false
    }

    fn time_base(&self) -> Rational {
        Rational::new(1, self.config.sample_rate as i64)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn sample_format(&self) -> SampleFormat {
        self.config.sample_format
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn channels(&self) -> usize {
        self.config.channels
    }
}

struct RawContainer {
    file: File,
    format: String,
    stream_time_base: Option<Rational>,
    streams: Vec<StreamDesc>,
    header_written: bool,
    packets_written: u64,
}

impl RawContainer {
    fn allocate(&mut self, codec_time_base: Rational) -> StreamDesc {
        let time_base = self.stream_time_base.unwrap_or(codec_time_base);
        let desc = StreamDesc { index: self.streams.len(), time_base };
        self.streams.push(desc);
        desc
    }
}

impl Container for RawContainer {
    fn add_video_stream(&mut self, config: &VideoEncoderConfig) -> Result<StreamDesc> {
        if self.header_written {
            return Err(Error::Codec("stream added after header".into()));
        }
        Ok(self.allocate(config.time_base))
    }

    fn add_audio_stream(&mut self, config: &AudioEncoderConfig) -> Result<StreamDesc> {
        if self.header_written {
            return Err(Error::Codec("stream added after header".into()));
        }
        Ok(self.allocate(Rational::new(1, config.sample_rate as i64)))
    }

    fn write_header(&mut self, options: &[(String, String)]) -> Result<Vec<String>> {
        self.file.write_all(b"RPKT")?;
        self.file.write_all(&(self.streams.len() as u32).to_le_bytes())?;
        self.file.write_all(self.format.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.header_written = true;

        // The reference container understands no options; everything is
        // reported back for the caller to log.
        Ok(options.iter().map(|(k, _)| k.clone()).collect())
    }

    fn write_interleaved(&mut self, packet: Packet) -> Result<()> {
        if !self.header_written {
            return Err(Error::Codec("packet before header".into()));
        }
        self.file.write_all(&[packet.stream_index as u8, u8::from(packet.keyframe)])?;
        self.file.write_all(&packet.pts.to_le_bytes())?;
        self.file.write_all(&packet.dts.to_le_bytes())?;
        self.file.write_all(&(packet.data.len() as u32).to_le_bytes())?;
        self.file.write_all(&packet.data)?;
        self.packets_written += 1;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.file.write_all(b"TRLR")?;
        self.file.write_all(&self.packets_written.to_le_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
