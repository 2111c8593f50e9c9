//! Pixel format conversion for the encoder path
//!
//! Composite frames arrive as BGRA; encoders want planar YUV (BT.601) or a
//! luma plane. Key-only output first shuffles the alpha plane into a
//! grayscale fill so the key can ride the same codec as the fill.

use crate::codec::PixelFormat;
use crate::error::{Error, Result};

/// Convert packed BGRA into the planes an encoder expects.
pub fn bgra_to_planes(
    data: &[u8],
    width: usize,
    height: usize,
    format: PixelFormat,
) -> Result<Vec<Vec<u8>>> {
    if data.len() != width * height * 4 {
        return Err(Error::Codec(format!(
            "pixel conversion: {} bytes is not {width}x{height} BGRA",
            data.len()
        )));
    }
    let planes = match format {
        PixelFormat::Bgra => vec![data.to_vec()],
        PixelFormat::Gray8 => vec![luma_plane(data, width, height)],
        PixelFormat::Yuv420p => yuv_planes(data, width, height, true),
        PixelFormat::Yuv422p => yuv_planes(data, width, height, false),
    };
    Ok(planes)
}

/// Extract the alpha plane into an opaque grayscale BGRA image.
pub fn extract_key(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for pixel in data.chunks_exact(4) {
        let alpha = pixel[3];
        out.extend_from_slice(&[alpha, alpha, alpha, 255]);
    }
    out
}

fn luma_plane(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut y_plane = Vec::with_capacity(width * height);
    for pixel in data.chunks_exact(4) {
        y_plane.push(luma(pixel));
    }
    y_plane
}

/// BT.601 limited-range conversion, integer approximation.
fn luma(bgra: &[u8]) -> u8 {
    let (b, g, r) = (bgra[0] as i32, bgra[1] as i32, bgra[2] as i32);
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(16, 235) as u8
}

fn chroma(bgra: &[u8]) -> (i32, i32) {
    let (b, g, r) = (bgra[0] as i32, bgra[1] as i32, bgra[2] as i32);
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (u.clamp(16, 240), v.clamp(16, 240))
}

fn yuv_planes(data: &[u8], width: usize, height: usize, subsample_vertical: bool) -> Vec<Vec<u8>> {
    let y_plane = luma_plane(data, width, height);

    let chroma_width = width.div_ceil(2);
    let chroma_height = if subsample_vertical { height.div_ceil(2) } else { height };
    let mut u_plane = Vec::with_capacity(chroma_width * chroma_height);
    let mut v_plane = Vec::with_capacity(chroma_width * chroma_height);

    let y_step = if subsample_vertical { 2 } else { 1 };
    let mut row = 0;
    while row < height {
        for col in (0..width).step_by(2) {
            // Average the horizontal (and for 4:2:0 the vertical) pair.
            let mut u_sum = 0;
            let mut v_sum = 0;
            let mut count = 0;
            for dy in 0..y_step.min(height - row) {
                for dx in 0..2.min(width - col) {
                    let i = ((row + dy) * width + col + dx) * 4;
                    let (u, v) = chroma(&data[i..i + 4]);
                    u_sum += u;
                    v_sum += v;
                    count += 1;
                }
            }
            u_plane.push((u_sum / count) as u8);
            v_plane.push((v_sum / count) as u8);
        }
        row += y_step;
    }

    vec![y_plane, u_plane, v_plane]
}
