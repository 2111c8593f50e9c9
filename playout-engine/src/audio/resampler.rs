//! Audio resampling and sample-format packing
//!
//! Composite frames carry interleaved 32-bit signed PCM at the channel rate.
//! Encoders want their own rate, channel count and sample format, planar or
//! interleaved. Resampling runs through rubato; rate-matched audio takes a
//! straight conversion path.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

use crate::codec::SampleFormat;
use crate::error::{Error, Result};

/// Convert one chunk of interleaved S32 to interleaved f32 at the target
/// rate and channel count.
///
/// Channel mapping: matching counts pass through; stereo upmixes into the
/// first two channels of a wider layout (extra channels silent, the 4.0 MXF
/// case); a wider source folds down to stereo by averaging pairs.
pub fn resample_chunk(
    samples: &[i32],
    input_rate: u32,
    input_channels: usize,
    output_rate: u32,
    output_channels: usize,
) -> Result<Vec<f32>> {
    if input_channels == 0 || samples.len() % input_channels != 0 {
        return Err(Error::Resample(format!(
            "{} samples do not divide into {input_channels} channels",
            samples.len()
        )));
    }

    let as_f32: Vec<f32> = samples.iter().map(|&s| s as f32 / i32::MAX as f32).collect();
    let remapped = remap_channels(&as_f32, input_channels, output_channels);

    if input_rate == output_rate {
        return Ok(remapped);
    }

    let planar = deinterleave(&remapped, output_channels);
    let frames = planar[0].len();
    if frames == 0 {
        return Ok(Vec::new());
    }

    let mut resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        frames,
        output_channels,
    )
    .map_err(|e| Error::Resample(format!("failed to create resampler: {e}")))?;

    let planar_out = resampler
        .process(&planar, None)
        .map_err(|e| Error::Resample(format!("resampling failed: {e}")))?;

    Ok(interleave(&planar_out))
}

/// Pack interleaved f32 samples into encoder planes.
///
/// Interleaved formats yield a single plane; planar formats one plane per
/// channel.
pub fn pack_samples(interleaved: &[f32], channels: usize, format: SampleFormat) -> Vec<Vec<u8>> {
    if format.is_planar() {
        let planar = deinterleave(interleaved, channels);
        planar.iter().map(|channel| pack_plane(channel, format)).collect()
    } else {
        vec![pack_plane(interleaved, format)]
    }
}

fn pack_plane(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    match format {
        SampleFormat::S16 | SampleFormat::S16Planar => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        SampleFormat::F32 | SampleFormat::F32Planar => {
            for &sample in samples {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
    bytes
}

fn remap_channels(interleaved: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return interleaved.to_vec();
    }
    let frames = interleaved.len() / from;
    let mut out = vec![0.0f32; frames * to];
    for frame in 0..frames {
        let src = &interleaved[frame * from..(frame + 1) * from];
        let dst = &mut out[frame * to..(frame + 1) * to];
        if from < to {
            dst[..from].copy_from_slice(src);
        } else {
            // Fold down: average source pairs into the stereo bed.
            for (i, slot) in dst.iter_mut().enumerate() {
                let mut sum = 0.0;
                let mut count = 0;
                let mut ch = i;
                while ch < from {
                    sum += src[ch];
                    count += 1;
                    ch += to;
                }
                *slot = sum / count as f32;
            }
        }
    }
    out
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in 0..frames {
        for (ch, plane) in planar.iter_mut().enumerate() {
            plane.push(samples[frame * channels + ch]);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let frames = planar[0].len();
    let mut out = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        for plane in planar {
            out.push(plane[frame]);
        }
    }
    out
}
