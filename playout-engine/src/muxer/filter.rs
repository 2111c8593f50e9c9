//! Filter graph adaptor
//!
//! Wraps the muxer's pixel-geometry conversion pipeline behind a textual
//! filter expression (`crop=W:H:X:Y`, `scale=w=W:h=H[:interl=1]`,
//! `yadif=MODE:-1`). An empty expression takes the fast path: frames pass
//! through a queue untouched, no conversion, no allocation. The adaptor
//! reports input-format changes so the owner can rebuild it with a fresh
//! display-mode classification.

use std::collections::VecDeque;

use tracing::trace;

use crate::error::{Error, Result};
use crate::muxer::DecodedFrame;

/// One parsed filter step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterStep {
    Crop { width: usize, height: usize, x: usize, y: usize },
    Scale { width: usize, height: usize, interlaced: bool },
    /// `bob = false`: one progressive frame per input.
    /// `bob = true`: two progressive frames per input, one per field.
    Yadif { bob: bool },
}

/// Append a step to a filter expression.
pub fn append_filter(expression: &str, step: &str) -> String {
    if expression.is_empty() {
        step.to_string()
    } else {
        format!("{expression},{step}")
    }
}

/// A configured conversion pipeline for one input format.
pub struct FilterChain {
    expression: String,
    steps: Vec<FilterStep>,
    in_width: usize,
    in_height: usize,
    output: VecDeque<DecodedFrame>,
}

impl FilterChain {
    pub fn new(in_width: usize, in_height: usize, expression: &str) -> Result<FilterChain> {
        let expression = expression.to_ascii_lowercase();
        let steps = parse(&expression)?;
        if !steps.is_empty() {
            trace!("filter[{expression}]: configured for {in_width}x{in_height}");
        }
        Ok(FilterChain { expression, steps, in_width, in_height, output: VecDeque::new() })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_fast_path(&self) -> bool {
        self.steps.is_empty()
    }

    /// True when the frame's geometry no longer matches the chain's input
    /// format and the owner must reconfigure.
    pub fn is_format_changed(&self, frame: &DecodedFrame) -> bool {
        frame.width != self.in_width || frame.height != self.in_height
    }

    /// Feed one frame through the chain.
    pub fn push(&mut self, frame: DecodedFrame) -> Result<()> {
        if self.is_fast_path() {
            self.output.push_back(frame);
            return Ok(());
        }

        let mut frames = vec![frame];
        for step in &self.steps {
            let mut next = Vec::with_capacity(frames.len() * 2);
            for frame in frames {
                match step {
                    FilterStep::Crop { width, height, x, y } => {
                        next.push(crop(&frame, *width, *height, *x, *y)?);
                    }
                    FilterStep::Scale { width, height, interlaced } => {
                        next.push(scale(&frame, *width, *height, *interlaced));
                    }
                    FilterStep::Yadif { bob } => next.extend(yadif(&frame, *bob)),
                }
            }
            frames = next;
        }
        self.output.extend(frames);
        Ok(())
    }

    /// Next converted frame; `None` means would-block (more input needed).
    pub fn poll(&mut self) -> Option<DecodedFrame> {
        self.output.pop_front()
    }

    /// Drain every available output.
    pub fn poll_all(&mut self) -> Vec<DecodedFrame> {
        self.output.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.output.clear();
    }
}

fn parse(expression: &str) -> Result<Vec<FilterStep>> {
    let mut steps = Vec::new();
    for part in expression.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, args) = part
            .split_once('=')
            .ok_or_else(|| Error::FilterGraph(format!("malformed filter step '{part}'")))?;
        let step = match name {
            "crop" => {
                let values = parse_ints(args, 4, part)?;
                FilterStep::Crop {
                    width: values[0],
                    height: values[1],
                    x: values[2],
                    y: values[3],
                }
            }
            "scale" => {
                let mut width = None;
                let mut height = None;
                let mut interlaced = false;
                for kv in args.split(':') {
                    match kv.split_once('=') {
                        Some(("w", v)) => width = v.parse().ok(),
                        Some(("h", v)) => height = v.parse().ok(),
                        Some(("interl", v)) => interlaced = v == "1",
                        _ => {
                            return Err(Error::FilterGraph(format!(
                                "unknown scale argument '{kv}'"
                            )))
                        }
                    }
                }
                match (width, height) {
                    (Some(width), Some(height)) => FilterStep::Scale { width, height, interlaced },
                    _ => {
                        return Err(Error::FilterGraph(format!(
                            "scale needs w= and h= in '{part}'"
                        )))
                    }
                }
            }
            "yadif" => {
                let mode = args.split(':').next().unwrap_or("");
                match mode {
                    "0" => FilterStep::Yadif { bob: false },
                    "1" => FilterStep::Yadif { bob: true },
                    other => {
                        return Err(Error::FilterGraph(format!("unknown yadif mode '{other}'")))
                    }
                }
            }
            other => return Err(Error::FilterGraph(format!("unknown filter '{other}'"))),
        };
        steps.push(step);
    }
    Ok(steps)
}

fn parse_ints(args: &str, count: usize, context: &str) -> Result<Vec<usize>> {
    let values: Vec<usize> = args.split(':').filter_map(|v| v.parse().ok()).collect();
    if values.len() != count {
        return Err(Error::FilterGraph(format!(
            "expected {count} integer arguments in '{context}'"
        )));
    }
    Ok(values)
}

fn crop(frame: &DecodedFrame, width: usize, height: usize, x: usize, y: usize) -> Result<DecodedFrame> {
    if x + width > frame.width || y + height > frame.height {
        return Err(Error::FilterGraph(format!(
            "crop {width}x{height}+{x}+{y} exceeds {}x{}",
            frame.width, frame.height
        )));
    }
    let mut data = Vec::with_capacity(width * height * 4);
    for row in y..y + height {
        let start = (row * frame.width + x) * 4;
        data.extend_from_slice(&frame.data[start..start + width * 4]);
    }
    Ok(DecodedFrame { width, height, data, ..frame.shallow_meta() })
}

fn scale(frame: &DecodedFrame, width: usize, height: usize, interlaced: bool) -> DecodedFrame {
    let data = if interlaced && height >= 2 {
        // Scale each field separately so field lines never blend.
        let (top, bottom) = split_fields(&frame.data, frame.width, frame.height);
        let top_scaled = bilinear(&top, frame.width, frame.height.div_ceil(2), width, height / 2);
        let bottom_scaled = bilinear(&bottom, frame.width, frame.height / 2, width, height / 2);
        weave_fields(&top_scaled, &bottom_scaled, width, height)
    } else {
        bilinear(&frame.data, frame.width, frame.height, width, height)
    };
    DecodedFrame { width, height, data, ..frame.shallow_meta() }
}

fn yadif(frame: &DecodedFrame, bob: bool) -> Vec<DecodedFrame> {
    let first_top = frame.top_field_first;
    let first = interpolate_field(frame, first_top);
    if !bob {
        return vec![DecodedFrame { interlaced: false, ..first }];
    }
    let second = interpolate_field(frame, !first_top);
    vec![
        DecodedFrame { interlaced: false, ..first },
        DecodedFrame { interlaced: false, ..second },
    ]
}

/// Keep one field's lines and linearly interpolate the other parity.
fn interpolate_field(frame: &DecodedFrame, top_field: bool) -> DecodedFrame {
    let width = frame.width;
    let height = frame.height;
    let keep_parity = if top_field { 0 } else { 1 };
    let mut data = vec![0u8; width * height * 4];

    for row in 0..height {
        let dst = &mut data[row * width * 4..(row + 1) * width * 4];
        if row % 2 == keep_parity {
            dst.copy_from_slice(&frame.data[row * width * 4..(row + 1) * width * 4]);
        } else {
            let above = if row == 0 { keep_parity } else { row - 1 };
            let below = if row + 1 < height { row + 1 } else { above };
            let a = &frame.data[above * width * 4..(above + 1) * width * 4];
            let b = &frame.data[below * width * 4..(below + 1) * width * 4];
            for i in 0..width * 4 {
                dst[i] = ((a[i] as u16 + b[i] as u16) / 2) as u8;
            }
        }
    }

    DecodedFrame { data, ..frame.shallow_meta() }
}

fn split_fields(data: &[u8], width: usize, height: usize) -> (Vec<u8>, Vec<u8>) {
    let mut top = Vec::with_capacity(width * height.div_ceil(2) * 4);
    let mut bottom = Vec::with_capacity(width * (height / 2) * 4);
    for row in 0..height {
        let line = &data[row * width * 4..(row + 1) * width * 4];
        if row % 2 == 0 {
            top.extend_from_slice(line);
        } else {
            bottom.extend_from_slice(line);
        }
    }
    (top, bottom)
}

fn weave_fields(top: &[u8], bottom: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut data = vec![0u8; width * height * 4];
    for row in 0..height {
        let field = if row % 2 == 0 { top } else { bottom };
        let field_row = row / 2;
        let src = &field[field_row * width * 4..(field_row + 1) * width * 4];
        data[row * width * 4..(row + 1) * width * 4].copy_from_slice(src);
    }
    data
}

fn bilinear(data: &[u8], in_w: usize, in_h: usize, out_w: usize, out_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_w * out_h * 4];
    if in_w == 0 || in_h == 0 || out_w == 0 || out_h == 0 {
        return out;
    }
    for oy in 0..out_h {
        let fy = (oy as f32 + 0.5) * in_h as f32 / out_h as f32 - 0.5;
        let y0 = fy.floor().max(0.0) as usize;
        let y1 = (y0 + 1).min(in_h - 1);
        let wy = (fy - y0 as f32).clamp(0.0, 1.0);
        for ox in 0..out_w {
            let fx = (ox as f32 + 0.5) * in_w as f32 / out_w as f32 - 0.5;
            let x0 = fx.floor().max(0.0) as usize;
            let x1 = (x0 + 1).min(in_w - 1);
            let wx = (fx - x0 as f32).clamp(0.0, 1.0);
            for c in 0..4 {
                let p00 = data[(y0 * in_w + x0) * 4 + c] as f32;
                let p01 = data[(y0 * in_w + x1) * 4 + c] as f32;
                let p10 = data[(y1 * in_w + x0) * 4 + c] as f32;
                let p11 = data[(y1 * in_w + x1) * 4 + c] as f32;
                let value = p00 * (1.0 - wx) * (1.0 - wy)
                    + p01 * wx * (1.0 - wy)
                    + p10 * (1.0 - wx) * wy
                    + p11 * wx * wy;
                out[(oy * out_w + ox) * 4 + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
