//! Encoder consumer
//!
//! Converts composite frames into a container/codec pair through the
//! [`CodecBackend`](crate::codec::CodecBackend) interface: a bounded queue
//! (capacity 8) feeds a dedicated encode worker per output file. Video is
//! pixel-converted from BGRA with a monotonic frame-number PTS; audio is
//! resampled and buffered to the encoder's frame size with a monotonic
//! sample-number PTS. `separate_key` runs a second, key-only pipeline
//! writing `<stem>_A.<ext>` with the alpha plane.
//!
//! A frame arriving while the queue is full is dropped (diagnostics tag
//! "dropped-frame") and its acknowledgement still resolves true — dropping
//! is acceptable for consumers that do not provide the channel clock. On
//! close the worker drains delayed codecs, writes the trailer and closes
//! the container. A construction failure deletes any partial output file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use playout_common::config::EncoderConsumerConfig;
use playout_common::diag::{self, Color, Graph};
use playout_common::format::{VideoFormat, VideoFormatDesc};
use playout_common::FieldMode;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::resampler;
use crate::codec::{
    AudioChunk, AudioEncoder, AudioEncoderConfig, CodecBackend, Container, Packet, PixelFormat,
    Rational, SampleFormat, StreamDesc, VideoEncoder, VideoEncoderConfig, VideoPicture,
};
use crate::consumer::{completed_ack, convert, Consumer, SendAck};
use crate::error::{Error, Result};
use crate::frame::OutputFrame;

/// Frames admitted into one sink at a time: queued plus in-flight. A frame
/// being encoded still occupies its slot until the worker finishes it, so
/// a wedged encoder accepts exactly this many before drops begin.
const QUEUE_CAPACITY: usize = 8;

/// How downstream PTS reacts when an upstream hand-off breaks source
/// continuity. `Compact` advances PTS only for encoded frames, so gaps
/// compress; this is the only policy the pipeline implements today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PtsPolicy {
    #[default]
    Compact,
}

/// Settings for one encoder consumer.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub filename: PathBuf,
    /// Video encoder name; container default when `None`
    pub vcodec: Option<String>,
    /// Audio encoder name; container default when `None`
    pub acodec: Option<String>,
    /// kbps, 0 = codec default
    pub vrate_kbps: i64,
    /// kbps, 0 = codec default
    pub arate_kbps: i64,
    pub separate_key: bool,
    pub narrow: bool,
    pub options: Vec<(String, String)>,
    /// Recorder gate: first accepted timecode
    pub tc_in: i32,
    /// Recorder gate: first rejected timecode
    pub tc_out: i32,
    pub pts_policy: PtsPolicy,
}

impl EncoderSettings {
    pub fn new(filename: impl Into<PathBuf>) -> EncoderSettings {
        EncoderSettings {
            filename: filename.into(),
            vcodec: None,
            acodec: None,
            vrate_kbps: 0,
            arate_kbps: 0,
            separate_key: false,
            narrow: false,
            options: Vec::new(),
            tc_in: 0,
            tc_out: i32::MAX,
            pts_policy: PtsPolicy::Compact,
        }
    }

    /// Build settings from a parsed configuration block.
    pub fn from_config(config: &EncoderConsumerConfig) -> Result<EncoderSettings> {
        Ok(EncoderSettings {
            filename: PathBuf::from(&config.filename),
            vcodec: config.vcodec.clone(),
            acodec: config.acodec.clone(),
            vrate_kbps: config.vrate,
            arate_kbps: config.arate,
            separate_key: config.separate_key,
            narrow: config.narrow,
            options: config.parsed_options()?,
            tc_in: 0,
            tc_out: i32::MAX,
            pts_policy: PtsPolicy::Compact,
        })
    }

    fn is_mxf(&self) -> bool {
        self.filename
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mxf"))
    }
}

/// Derive the video encoder configuration for a channel format.
///
/// The `.MXF` path carries the IMX50 parameter set: 50 Mb/s CBR MPEG-2
/// 4:2:2P with a one-frame GOP and a 2 MB VBV.
pub(crate) fn video_config(
    desc: &VideoFormatDesc,
    settings: &EncoderSettings,
    codec: &str,
) -> VideoEncoderConfig {
    let mut config = VideoEncoderConfig {
        codec: codec.to_string(),
        width: desc.width,
        height: desc.height,
        pixel_format: PixelFormat::Yuv420p,
        bit_rate: 0,
        rc_max_rate: 0,
        rc_min_rate: 0,
        rc_buffer_size: 0,
        gop_size: 25,
        max_b_frames: 0,
        interlaced: desc.field_mode.is_interlaced(),
        top_field_first: desc.field_mode == FieldMode::Upper,
        time_base: Rational::new(desc.duration as i64, desc.time_scale as i64),
        sample_aspect_ratio: sample_aspect_ratio(desc, !settings.narrow),
    };

    match codec {
        "libx264" => {
            config.pixel_format = PixelFormat::Yuv420p;
            config.bit_rate = desc.height as i64 * 14 * 1000;
        }
        "mpeg2video" if settings.is_mxf() && desc.format == VideoFormat::Pal => {
            config.pixel_format = PixelFormat::Yuv422p;
            config.bit_rate = 50_000_000;
            config.rc_max_rate = config.bit_rate;
            config.rc_min_rate = config.bit_rate;
            config.rc_buffer_size = 2_000_000;
            config.gop_size = 1;
        }
        "mpeg2video" => {
            config.pixel_format = PixelFormat::Yuv422p;
            config.bit_rate = 15_000_000;
        }
        "rawvideo" => {
            config.pixel_format = PixelFormat::Bgra;
        }
        _ => {}
    }

    if settings.vrate_kbps != 0 {
        config.bit_rate = settings.vrate_kbps * 1024;
    }
    config
}

/// Derive the audio encoder configuration for a channel format.
pub(crate) fn audio_config(
    desc: &VideoFormatDesc,
    settings: &EncoderSettings,
    codec: &str,
) -> AudioEncoderConfig {
    let mut config = AudioEncoderConfig {
        codec: codec.to_string(),
        sample_rate: desc.audio_sample_rate,
        channels: 2,
        sample_format: SampleFormat::S16,
        bit_rate: 0,
    };

    if codec == "aac" {
        config.sample_format = SampleFormat::F32Planar;
        config.bit_rate = 160 * 1024;
    }
    if settings.is_mxf() {
        // IMX AES layout: four channels of 16-bit PCM.
        config.channels = 4;
        config.sample_format = SampleFormat::S16;
    }
    if settings.arate_kbps != 0 {
        config.bit_rate = settings.arate_kbps * 1024;
    }
    config
}

fn sample_aspect_ratio(desc: &VideoFormatDesc, widescreen: bool) -> Rational {
    match desc.format {
        VideoFormat::Pal => {
            if widescreen { Rational::new(64, 45) } else { Rational::new(16, 15) }
        }
        VideoFormat::Ntsc => {
            if widescreen { Rational::new(32, 27) } else { Rational::new(8, 9) }
        }
        _ => Rational::new(1, 1),
    }
}

struct EncodeJob {
    frame: Arc<OutputFrame>,
    ack: oneshot::Sender<bool>,
}

/// One output file: bounded queue + encode worker.
struct EncoderSink {
    tx: Option<mpsc::Sender<EncodeJob>>,
    task: Option<JoinHandle<()>>,
    graph: Arc<Graph>,
    dropped: Arc<AtomicU64>,
    /// Frames accepted but not yet fully encoded (queued + in-flight)
    pending: Arc<AtomicUsize>,
    path: PathBuf,
    print_name: String,
}

impl EncoderSink {
    fn new(
        path: PathBuf,
        desc: &VideoFormatDesc,
        key_only: bool,
        settings: &EncoderSettings,
        backend: &Arc<dyn CodecBackend>,
    ) -> Result<EncoderSink> {
        let print_name = format!("encoder-consumer[{}]", path.display());

        let graph = Graph::new();
        graph.set_text(&print_name);
        graph.set_color("frame-time", Color(0.1, 1.0, 0.1));
        graph.set_color("dropped-frame", Color(0.3, 0.6, 0.3));
        diag::register_graph(&graph);

        let worker = match build_worker(&path, desc, key_only, settings, backend.as_ref(), &graph, &print_name)
        {
            Ok(worker) => worker,
            Err(e) => {
                // Never leave a half-written output behind.
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        let task = tokio::task::spawn_blocking(move || worker_loop(rx, worker, worker_pending));

        info!("{print_name}: initialized");
        Ok(EncoderSink {
            tx: Some(tx),
            task: Some(task),
            graph,
            dropped: Arc::new(AtomicU64::new(0)),
            pending,
            path,
            print_name,
        })
    }

    fn ready_for_frame(&self) -> bool {
        // The frame the worker is encoding still holds its slot, so a
        // stalled encoder admits QUEUE_CAPACITY frames in total.
        self.tx.is_some() && self.pending.load(Ordering::Acquire) < QUEUE_CAPACITY
    }

    fn enqueue(&self, frame: Arc<OutputFrame>) -> SendAck {
        let (ack_tx, ack_rx) = oneshot::channel();
        match &self.tx {
            Some(tx) => {
                self.pending.fetch_add(1, Ordering::AcqRel);
                if tx.try_send(EncodeJob { frame, ack: ack_tx }).is_err() {
                    // Lost the race with close; count it as a drop.
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    self.mark_dropped();
                    return completed_ack(true);
                }
                ack_rx
            }
            None => completed_ack(true),
        }
    }

    fn mark_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.graph.set_tag("dropped-frame");
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn close(&mut self) {
        self.tx.take();
        if let Some(task) = self.task.take() {
            if task.await.is_err() {
                error!("{}: encode worker panicked", self.print_name);
            }
        }
        info!("{}: uninitialized", self.print_name);
    }

    /// Tear down without finalizing; used when a sibling sink failed to
    /// construct.
    async fn abort_and_remove(&mut self) {
        self.close().await;
        let _ = std::fs::remove_file(&self.path);
    }
}

struct Worker {
    container: Box<dyn Container>,
    video_encoder: Box<dyn VideoEncoder>,
    video_stream: StreamDesc,
    audio: Option<(Box<dyn AudioEncoder>, StreamDesc)>,
    audio_fifo: Vec<Vec<u8>>,
    desc: VideoFormatDesc,
    key_only: bool,
    frame_number: i64,
    sample_number: i64,
    graph: Arc<Graph>,
    print_name: String,
}

#[allow(clippy::too_many_arguments)]
fn build_worker(
    path: &Path,
    desc: &VideoFormatDesc,
    key_only: bool,
    settings: &EncoderSettings,
    backend: &dyn CodecBackend,
    graph: &Arc<Graph>,
    print_name: &str,
) -> Result<Worker> {
    let filename = path.to_string_lossy();
    let format = if settings.is_mxf() {
        backend.guess_format(&filename, Some("mxf_d10"))?
    } else {
        backend.guess_format(&filename, None)?
    };

    let vcodec = settings.vcodec.clone().unwrap_or_else(|| format.default_vcodec.clone());
    let acodec = settings.acodec.clone().unwrap_or_else(|| format.default_acodec.clone());

    let mut container = backend.open_container(path, &format)?;

    let video_cfg = video_config(desc, settings, &vcodec);
    let video_encoder = backend.open_video_encoder(&video_cfg)?;
    let video_stream = container.add_video_stream(&video_cfg)?;

    let audio = if key_only {
        None
    } else {
        let audio_cfg = audio_config(desc, settings, &acodec);
        let encoder = backend.open_audio_encoder(&audio_cfg)?;
        let stream = container.add_audio_stream(&audio_cfg)?;
        Some((encoder, stream))
    };

    let unrecognized = container.write_header(&settings.options)?;
    if !unrecognized.is_empty() {
        warn!("{print_name}: unrecognized container options: {unrecognized:?}");
    }

    Ok(Worker {
        container,
        video_encoder,
        video_stream,
        audio,
        audio_fifo: Vec::new(),
        desc: desc.clone(),
        key_only,
        frame_number: 0,
        sample_number: 0,
        graph: Arc::clone(graph),
        print_name: print_name.to_string(),
    })
}

fn worker_loop(mut rx: mpsc::Receiver<EncodeJob>, mut worker: Worker, pending: Arc<AtomicUsize>) {
    while let Some(job) = rx.blocking_recv() {
        let timer = Instant::now();

        if let Err(e) = worker.encode_video_frame(&job.frame) {
            error!("{}: video encode failed: {e}", worker.print_name);
        }
        if !worker.key_only {
            if let Err(e) = worker.encode_audio_frame(&job.frame) {
                error!("{}: audio encode failed: {e}", worker.print_name);
            }
        }

        worker
            .graph
            .set_value("frame-time", timer.elapsed().as_secs_f64() * worker.desc.fps() * 0.5);
        let _ = job.ack.send(true);
        pending.fetch_sub(1, Ordering::AcqRel);
    }

    // Queue closed: drain delayed codecs, then finalize the container.
    worker.drain();
    if let Err(e) = worker.container.write_trailer() {
        error!("{}: failed to write trailer: {e}", worker.print_name);
    }
}

impl Worker {
    fn encode_video_frame(&mut self, frame: &OutputFrame) -> Result<()> {
        if frame.width != self.desc.width || frame.height != self.desc.height {
            return Err(Error::Config(format!(
                "composite frame {}x{} does not match channel {}x{}",
                frame.width, frame.height, self.desc.width, self.desc.height
            )));
        }

        let shuffled;
        let image: &[u8] = if self.key_only {
            shuffled = convert::extract_key(&frame.image);
            &shuffled
        } else {
            &frame.image
        };

        let planes = convert::bgra_to_planes(
            image,
            frame.width,
            frame.height,
            self.video_encoder.pixel_format(),
        )?;

        let picture = VideoPicture {
            width: frame.width,
            height: frame.height,
            pixel_format: self.video_encoder.pixel_format(),
            planes,
            pts: self.frame_number,
            interlaced: self.desc.field_mode.is_interlaced(),
            top_field_first: self.desc.field_mode == FieldMode::Upper,
        };
        self.frame_number += 1;

        if let Some(packet) = self.video_encoder.encode(&picture)? {
            self.write_packet(packet, self.video_encoder.time_base(), self.video_stream)?;
        }
        Ok(())
    }

    fn encode_audio_frame(&mut self, frame: &OutputFrame) -> Result<()> {
        // Take the encoder out so the fifo/container can be borrowed freely.
        let Some((mut encoder, stream)) = self.audio.take() else {
            return Ok(());
        };
        let result = self.encode_audio_with(encoder.as_mut(), stream, frame);
        self.audio = Some((encoder, stream));
        result
    }

    fn encode_audio_with(
        &mut self,
        encoder: &mut dyn AudioEncoder,
        stream: StreamDesc,
        frame: &OutputFrame,
    ) -> Result<()> {
        let interleaved = resampler::resample_chunk(
            &frame.audio,
            self.desc.audio_sample_rate,
            self.desc.audio_channels,
            encoder.sample_rate(),
            encoder.channels(),
        )?;
        let new_planes =
            resampler::pack_samples(&interleaved, encoder.channels(), encoder.sample_format());

        if self.audio_fifo.len() != new_planes.len() {
            self.audio_fifo = vec![Vec::new(); new_planes.len()];
        }
        for (fifo, plane) in self.audio_fifo.iter_mut().zip(&new_planes) {
            fifo.extend_from_slice(plane);
        }

        let bytes_per_sample = encoder.sample_format().bytes_per_sample();
        let per_plane_channels =
            if encoder.sample_format().is_planar() { 1 } else { encoder.channels() };
        let frame_bytes = encoder.frame_size() * bytes_per_sample * per_plane_channels;

        loop {
            let available = self.audio_fifo.first().map_or(0, Vec::len);
            // Codecs without a fixed frame size take the whole buffer.
            let take = if encoder.frame_size() == 0 {
                if available == 0 {
                    break;
                }
                available
            } else {
                if available < frame_bytes {
                    break;
                }
                frame_bytes
            };

            let planes: Vec<Vec<u8>> =
                self.audio_fifo.iter_mut().map(|fifo| fifo.drain(..take).collect()).collect();
            let samples = take / (bytes_per_sample * per_plane_channels);

            let chunk = AudioChunk { planes, samples, pts: self.sample_number };
            self.sample_number += samples as i64;

            if let Some(packet) = encoder.encode(&chunk)? {
                let time_base = encoder.time_base();
                self.write_packet(packet, time_base, stream)?;
            }
        }
        Ok(())
    }

    fn write_packet(&mut self, mut packet: Packet, codec_tb: Rational, stream: StreamDesc) -> Result<()> {
        packet.pts = codec_tb.rescale(packet.pts, stream.time_base);
        packet.dts = codec_tb.rescale(packet.dts, stream.time_base);
        packet.stream_index = stream.index;
        self.container.write_interleaved(packet)
    }

    fn drain(&mut self) {
        if self.video_encoder.has_delay() {
            loop {
                match self.video_encoder.flush() {
                    Ok(Some(packet)) => {
                        let time_base = self.video_encoder.time_base();
                        if let Err(e) = self.write_packet(packet, time_base, self.video_stream) {
                            warn!("{}: flush write failed: {e}", self.print_name);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("{}: video flush failed: {e}", self.print_name);
                        break;
                    }
                }
            }
        }

        if let Some((encoder, stream)) = &mut self.audio {
            let stream = *stream;
            if encoder.has_delay() {
                loop {
                    match encoder.flush() {
                        Ok(Some(mut packet)) => {
                            let time_base = encoder.time_base();
                            packet.pts = time_base.rescale(packet.pts, stream.time_base);
                            packet.dts = time_base.rescale(packet.dts, stream.time_base);
                            packet.stream_index = stream.index;
                            if let Err(e) = self.container.write_interleaved(packet) {
                                warn!("{}: flush write failed: {e}", self.print_name);
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("{}: audio flush failed: {e}", self.print_name);
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Consumer writing one (or, with `separate_key`, two) encoded output
/// files.
pub struct EncoderConsumer {
    fill: EncoderSink,
    key: Option<EncoderSink>,
    tc_in: i32,
    tc_out: i32,
}

impl EncoderConsumer {
    /// Build the fill (and optional key) pipelines. Fails fast on
    /// configuration errors, removing partial outputs.
    pub async fn new(
        settings: EncoderSettings,
        desc: &VideoFormatDesc,
        backend: Arc<dyn CodecBackend>,
    ) -> Result<EncoderConsumer> {
        let fill = EncoderSink::new(settings.filename.clone(), desc, false, &settings, &backend)?;

        let key = if settings.separate_key {
            let key_path = key_filename(&settings.filename);
            match EncoderSink::new(key_path, desc, true, &settings, &backend) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    let mut fill = fill;
                    fill.abort_and_remove().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(EncoderConsumer { fill, key, tc_in: settings.tc_in, tc_out: settings.tc_out })
    }

    /// Frames intentionally discarded due to a full queue.
    pub fn dropped_frames(&self) -> u64 {
        self.fill.dropped()
    }

    /// Consumer description for monitoring surfaces.
    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "encoder-consumer",
            "filename": self.fill.path.display().to_string(),
            "separate_key": self.key.is_some(),
            "dropped_frames": self.dropped_frames(),
        })
    }
}

/// `out.mxf` -> `out_A.mxf`
fn key_filename(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    let mut name = format!("{stem}_A");
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        name.push('.');
        name.push_str(extension);
    }
    path.with_file_name(name)
}

#[async_trait]
impl Consumer for EncoderConsumer {
    fn send(&mut self, frame: Arc<OutputFrame>) -> Result<SendAck> {
        // Recorder gate: out-of-range frames are silently discarded before
        // encoding, so PTS gaps compress.
        if let Some(timecode) = frame.timecode {
            if timecode < self.tc_in || timecode >= self.tc_out {
                return Ok(completed_ack(true));
            }
        }

        let ready = self.fill.ready_for_frame()
            && self.key.as_ref().map_or(true, EncoderSink::ready_for_frame);

        if !ready {
            self.fill.mark_dropped();
            if let Some(key) = &self.key {
                key.mark_dropped();
            }
            debug!("{}: queue full, frame dropped", self.fill.print_name);
            return Ok(completed_ack(true));
        }

        let ack = self.fill.enqueue(Arc::clone(&frame));
        if let Some(key) = &self.key {
            let _ = key.enqueue(frame);
        }
        Ok(ack)
    }

    async fn close(&mut self) -> Result<()> {
        self.fill.close().await;
        if let Some(key) = &mut self.key {
            key.close().await;
        }
        Ok(())
    }

    fn print_name(&self) -> String {
        self.fill.print_name.clone()
    }
}
