//! Software compositor
//!
//! Flattens the per-tick frame tree into a single [`OutputFrame`] of the
//! channel geometry: alpha-over blending in compositing order with the
//! accumulated transform applied (opacity, normalized translation, sampling
//! window), and a saturating mix of every leaf's audio scaled by its volume.
//!
//! This is the reference frame processor standing in for the GPU mixer
//! behind the same sink seam; the composite is delivered through a
//! read-only host buffer so downstream consumers only ever touch CPU-visible
//! memory.

use std::sync::Arc;

use crate::frame::{Frame, FrameFactory, ImageFrame, OutputFrame, Transform};
use crate::gpu::{GpuContext, Usage};

/// CPU compositor for one channel.
pub struct SoftwareMixer {
    factory: Arc<FrameFactory>,
    gpu: GpuContext,
}

impl SoftwareMixer {
    pub fn new(factory: Arc<FrameFactory>) -> SoftwareMixer {
        SoftwareMixer { factory, gpu: GpuContext::default() }
    }

    /// Flatten a frame tree into one composite output frame.
    pub fn composite(&self, frame: &Frame) -> OutputFrame {
        let desc = self.factory.desc();
        let width = desc.width;
        let height = desc.height;

        let mut canvas = vec![0u8; width * height * 4];
        let mut audio: Vec<i64> = Vec::new();
        let mut timecode = None;

        flatten(frame, &Transform::default(), &mut |image, transform| {
            draw(&mut canvas, width, height, image, transform);
            mix_audio(&mut audio, &image.audio, transform.volume);
            if timecode.is_none() {
                timecode = image.timecode;
            }
        });

        // Composite leaves through the readback path so the contract the
        // real mixer relies on stays exercised.
        let pool = self.factory.pool();
        let mut buffer = pool.take(canvas.len(), Usage::ReadOnly);
        buffer.bind();
        buffer.fill_from(&canvas);
        buffer
            .begin_read(width, height, 4)
            .expect("read-only buffer sized for the canvas");
        buffer.wait(&self.gpu);
        let image = buffer.data().to_vec();
        buffer.unbind();
        pool.give_back(buffer);

        OutputFrame {
            width,
            height,
            image,
            audio: audio
                .into_iter()
                .map(|s| s.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                .collect(),
            timecode,
        }
    }
}

fn flatten(frame: &Frame, accumulated: &Transform, visit: &mut impl FnMut(&ImageFrame, &Transform)) {
    match frame {
        Frame::Eos | Frame::Empty => {}
        Frame::Image(image) => visit(image, accumulated),
        Frame::Group(children) => {
            for child in children {
                flatten(child, accumulated, visit);
            }
        }
        Frame::Transformed(inner, transform) => {
            let combined = accumulated.combined(transform);
            flatten(inner, &combined, visit);
        }
    }
}

/// Alpha-over blend of one leaf onto the canvas.
///
/// The leaf covers the normalized screen span `[tx, tx + 1)`; across that
/// span the sampling coordinate runs linearly from `window.x0` to
/// `window.x1`, so a narrowed window reveals a sub-rectangle (wipes) while a
/// plain translation slides the full image (slide/push).
fn draw(canvas: &mut [u8], width: usize, height: usize, image: &ImageFrame, transform: &Transform) {
    if transform.alpha <= 0.0 {
        return;
    }
    let (tx, ty) = transform.translation;
    let window = &transform.window;

    for y in 0..height {
        let qy = y as f64 / height as f64 - ty;
        if !(0.0..1.0).contains(&qy) {
            continue;
        }
        let v = window.y0 + qy * (window.y1 - window.y0);
        if !(0.0..1.0).contains(&v) {
            continue;
        }
        let sy = ((v * image.height as f64) as usize).min(image.height.saturating_sub(1));

        for x in 0..width {
            let qx = x as f64 / width as f64 - tx;
            if !(0.0..1.0).contains(&qx) {
                continue;
            }
            let u = window.x0 + qx * (window.x1 - window.x0);
            if !(0.0..1.0).contains(&u) {
                continue;
            }
            let sx = ((u * image.width as f64) as usize).min(image.width.saturating_sub(1));

            let at = (y * width + x) * 4;
            let dst = &mut canvas[at..at + 4];
            let out = over(
                [dst[0], dst[1], dst[2], dst[3]],
                image.pixel(sx, sy),
                transform.alpha,
            );
            dst.copy_from_slice(&out);
        }
    }
}

/// Fixed-point source-over blend of one BGRA pixel at the given opacity.
fn over(dst: [u8; 4], src: [u8; 4], opacity: f64) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

fn mix_audio(accumulator: &mut Vec<i64>, samples: &[i32], volume: u16) {
    if samples.len() > accumulator.len() {
        accumulator.resize(samples.len(), 0);
    }
    for (i, &sample) in samples.iter().enumerate() {
        accumulator[i] += sample as i64 * volume as i64 / 255;
    }
}
