//! Solid-color producer
//!
//! Test-pattern source: emits an endless stream of frames filled with one
//! color. Used for channel bring-up and as the background of wipe/slide
//! transitions in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameFactory, ImageFrame};
use crate::producer::Producer;

/// Producer emitting a constant solid-color frame.
pub struct ColorProducer {
    color: [u8; 4],
    name: String,
    frame: Option<Arc<ImageFrame>>,
}

impl ColorProducer {
    /// Create from a color spec: a well-known name or `#AARRGGBB`.
    pub fn new(spec: &str) -> Result<ColorProducer> {
        let color = parse_color(spec)?;
        Ok(ColorProducer {
            color,
            name: format!("color[{}]", spec.to_ascii_lowercase()),
            frame: None,
        })
    }
}

#[async_trait]
impl Producer for ColorProducer {
    async fn receive(&mut self) -> Result<Frame> {
        match &self.frame {
            Some(frame) => Ok(Frame::Image(Arc::clone(frame))),
            None => Err(Error::Producer(format!("{} not initialized", self.name))),
        }
    }

    async fn initialize(&mut self, factory: &Arc<FrameFactory>) -> Result<()> {
        let desc = factory.desc();
        let mut data = Vec::with_capacity(desc.width * desc.height * 4);
        for _ in 0..desc.width * desc.height {
            data.extend_from_slice(&self.color);
        }
        self.frame = Some(factory.create_frame(
            desc.width,
            desc.height,
            data,
            Vec::new(),
            desc.field_mode.is_interlaced(),
            desc.field_mode == playout_common::FieldMode::Upper,
            None,
        )?);
        debug!("{} initialized for {}x{}", self.name, desc.width, desc.height);
        Ok(())
    }

    fn print_name(&self) -> String {
        self.name.clone()
    }
}

/// Parse a color name or `#AARRGGBB` hex spec into BGRA bytes.
fn parse_color(spec: &str) -> Result<[u8; 4]> {
    let lower = spec.to_ascii_lowercase();
    let argb: u32 = match lower.as_str() {
        "black" => 0xFF00_0000,
        "white" => 0xFFFF_FFFF,
        "red" => 0xFFFF_0000,
        "green" => 0xFF00_FF00,
        "blue" => 0xFF00_00FF,
        "empty" => 0x0000_0000,
        hex if hex.starts_with('#') && hex.len() == 9 => u32::from_str_radix(&hex[1..], 16)
            .map_err(|_| Error::Producer(format!("invalid color spec '{spec}'")))?,
        _ => return Err(Error::Producer(format!("invalid color spec '{spec}'"))),
    };

    let a = (argb >> 24) as u8;
    let r = (argb >> 16) as u8;
    let g = (argb >> 8) as u8;
    let b = argb as u8;
    Ok([b, g, r, a])
}
