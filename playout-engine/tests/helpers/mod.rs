//! Shared helpers for integration tests: deterministic producers, a
//! capturing consumer and a parser for the reference container's packet
//! log.

// Each integration test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use playout_engine::consumer::{completed_ack, Consumer, SendAck};
use playout_engine::frame::{Frame, FrameFactory, ImageFrame, OutputFrame};
use playout_engine::producer::{Producer, SharedProducer};
use playout_engine::Result;
use tokio::sync::mpsc;

/// Emits solid-color frames of the channel geometry, optionally finite and
/// optionally chaining into a following producer.
pub struct SolidProducer {
    name: String,
    bgra: [u8; 4],
    remaining: Option<u32>,
    following: Option<SharedProducer>,
    frame: Option<Arc<ImageFrame>>,
}

impl SolidProducer {
    pub fn new(name: &str, bgra: [u8; 4]) -> SolidProducer {
        SolidProducer { name: name.to_string(), bgra, remaining: None, following: None, frame: None }
    }

    pub fn finite(name: &str, bgra: [u8; 4], frames: u32) -> SolidProducer {
        SolidProducer {
            name: name.to_string(),
            bgra,
            remaining: Some(frames),
            following: None,
            frame: None,
        }
    }

    pub fn with_following(mut self, following: SharedProducer) -> SolidProducer {
        self.following = Some(following);
        self
    }
}

#[async_trait]
impl Producer for SolidProducer {
    async fn receive(&mut self) -> Result<Frame> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return Ok(Frame::Eos);
            }
            *remaining -= 1;
        }
        match &self.frame {
            Some(frame) => Ok(Frame::Image(Arc::clone(frame))),
            None => Ok(Frame::Empty),
        }
    }

    fn following(&mut self) -> Option<SharedProducer> {
        self.following.take()
    }

    async fn initialize(&mut self, factory: &Arc<FrameFactory>) -> Result<()> {
        let desc = factory.desc();
        let mut data = Vec::with_capacity(desc.width * desc.height * 4);
        for _ in 0..desc.width * desc.height {
            data.extend_from_slice(&self.bgra);
        }
        self.frame = Some(factory.create_frame(
            desc.width,
            desc.height,
            data,
            vec![1000; desc.audio_cadence[0] * desc.audio_channels],
            false,
            false,
            None,
        )?);
        Ok(())
    }

    fn print_name(&self) -> String {
        self.name.clone()
    }
}

/// Consumer forwarding every composite into an unbounded channel.
pub struct CapturingConsumer {
    tx: mpsc::UnboundedSender<Arc<OutputFrame>>,
}

impl CapturingConsumer {
    pub fn new() -> (CapturingConsumer, mpsc::UnboundedReceiver<Arc<OutputFrame>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CapturingConsumer { tx }, rx)
    }
}

#[async_trait]
impl Consumer for CapturingConsumer {
    fn send(&mut self, frame: Arc<OutputFrame>) -> Result<SendAck> {
        let _ = self.tx.send(frame);
        Ok(completed_ack(true))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn print_name(&self) -> String {
        "capturing-consumer".to_string()
    }
}

/// One packet entry from the reference container's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedPacket {
    pub stream_index: u8,
    pub keyframe: bool,
    pub pts: i64,
    pub dts: i64,
    pub size: usize,
}

/// Parsed reference container file.
pub struct PacketLog {
    pub format: String,
    pub stream_count: u32,
    pub packets: Vec<LoggedPacket>,
    pub trailer_count: Option<u64>,
}

/// Parse the `RPKT` packet-log format written by the reference backend.
pub fn parse_packet_log(bytes: &[u8]) -> PacketLog {
    assert!(bytes.starts_with(b"RPKT"), "missing RPKT header");
    let stream_count = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let newline = bytes[8..].iter().position(|&b| b == b'\n').expect("format line") + 8;
    let format = String::from_utf8(bytes[8..newline].to_vec()).unwrap();

    let mut packets = Vec::new();
    let mut trailer_count = None;
    let mut at = newline + 1;
    while at < bytes.len() {
        if &bytes[at..at + 4] == b"TRLR" {
            trailer_count =
                Some(u64::from_le_bytes(bytes[at + 4..at + 12].try_into().unwrap()));
            break;
        }
        let stream_index = bytes[at];
        let keyframe = bytes[at + 1] == 1;
        let pts = i64::from_le_bytes(bytes[at + 2..at + 10].try_into().unwrap());
        let dts = i64::from_le_bytes(bytes[at + 10..at + 18].try_into().unwrap());
        let size = u32::from_le_bytes(bytes[at + 18..at + 22].try_into().unwrap()) as usize;
        packets.push(LoggedPacket { stream_index, keyframe, pts, dts, size });
        at += 22 + size;
    }

    PacketLog { format, stream_count, packets, trailer_count }
}
