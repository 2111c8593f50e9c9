//! Frame timing helpers
//!
//! Frame numbers, timecodes and millisecond conversions for a fixed
//! `time_scale / duration` channel clock. Frame math is integer-exact;
//! millisecond conversions truncate.

use crate::format::VideoFormatDesc;

/// Convert a frame number to elapsed milliseconds on the channel clock.
pub fn frames_to_ms(desc: &VideoFormatDesc, frames: u64) -> u64 {
    frames * desc.duration * 1000 / desc.time_scale
}

/// Convert elapsed milliseconds to a frame number (truncating).
pub fn ms_to_frames(desc: &VideoFormatDesc, ms: u64) -> u64 {
    ms * desc.time_scale / (desc.duration * 1000)
}

/// Render a frame number as an `HH:MM:SS:FF` timecode string.
///
/// Uses the nominal (non-drop) frame count per second, which is how the
/// recorder interface reports timecodes.
pub fn frames_to_timecode(desc: &VideoFormatDesc, frames: u64) -> String {
    let fps = (desc.time_scale + desc.duration - 1) / desc.duration; // nominal, e.g. 30 for 29.97
    let ff = frames % fps;
    let total_seconds = frames / fps;
    let ss = total_seconds % 60;
    let mm = (total_seconds / 60) % 60;
    let hh = total_seconds / 3600;
    format!("{hh:02}:{mm:02}:{ss:02}:{ff:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pal_frame_ms_roundtrip() {
        let desc = VideoFormatDesc::find("pal").unwrap();
        assert_eq!(frames_to_ms(&desc, 25), 1000);
        assert_eq!(ms_to_frames(&desc, 1000), 25);
        assert_eq!(ms_to_frames(&desc, 1039), 25); // truncates
    }

    #[test]
    fn ntsc_frames_to_ms_truncates() {
        let desc = VideoFormatDesc::find("ntsc").unwrap();
        // 30000 frames = 1001 seconds exactly
        assert_eq!(frames_to_ms(&desc, 30_000), 1_001_000);
    }

    #[test]
    fn timecode_rendering() {
        let desc = VideoFormatDesc::find("pal").unwrap();
        assert_eq!(frames_to_timecode(&desc, 0), "00:00:00:00");
        assert_eq!(frames_to_timecode(&desc, 26), "00:00:01:01");
        assert_eq!(frames_to_timecode(&desc, 25 * 3600), "01:00:00:00");
    }
}
