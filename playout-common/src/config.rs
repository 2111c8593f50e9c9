//! Configuration loading
//!
//! TOML configuration for channels and their consumers. The engine consumes
//! the parsed structures; discovering the file path (CLI flags, environment)
//! is the embedding application's job.
//!
//! ```toml
//! [[channel]]
//! video_mode = "1080i5000"
//!
//! [[channel.consumer]]
//! filename = "capture.mxf"
//! vrate = 50000
//! separate_key = true
//! options = "movflags=faststart,flush_packets=1"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

/// One playout channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel format name, e.g. "pal", "1080i5000"
    pub video_mode: String,

    #[serde(default, rename = "consumer")]
    pub consumers: Vec<EncoderConsumerConfig>,
}

/// Configuration for one encoder consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConsumerConfig {
    /// Output path or URL
    pub filename: String,

    /// Video encoder name; the backend default is used when absent
    #[serde(default)]
    pub vcodec: Option<String>,

    /// Audio encoder name; the backend default is used when absent
    #[serde(default)]
    pub acodec: Option<String>,

    /// Video bitrate in kbps; 0 means codec default
    #[serde(default)]
    pub vrate: i64,

    /// Audio bitrate in kbps; 0 means codec default
    #[serde(default)]
    pub arate: i64,

    /// Also emit a `<stem>_A.<ext>` file carrying the alpha plane
    #[serde(default)]
    pub separate_key: bool,

    /// Narrow (4:3) sample aspect ratio; widescreen when false
    #[serde(default)]
    pub narrow: bool,

    /// Comma-separated `k=v` pairs forwarded to the container
    #[serde(default)]
    pub options: String,
}

impl EncoderConsumerConfig {
    /// Split the `options` string into key/value pairs.
    ///
    /// Malformed entries (no `=`) are rejected so typos surface at load time
    /// rather than as silently ignored container options.
    pub fn parsed_options(&self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for entry in self.options.split(',').filter(|s| !s.trim().is_empty()) {
            match entry.split_once('=') {
                Some((k, v)) => pairs.push((k.trim().to_string(), v.trim().to_string())),
                None => {
                    return Err(Error::Config(format!(
                        "malformed consumer option '{entry}' (expected k=v)"
                    )))
                }
            }
        }
        Ok(pairs)
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    debug!("loading configuration from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Parse configuration from TOML text.
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text)?;
    for channel in &config.channels {
        crate::format::VideoFormatDesc::find(&channel.video_mode)
            .map_err(|e| Error::Config(format!("channel video_mode: {e}")))?;
        for consumer in &channel.consumers {
            if consumer.filename.trim().is_empty() {
                return Err(Error::Config("consumer filename must be non-empty".into()));
            }
            consumer.parsed_options()?;
        }
    }
    debug!(
        "configuration parsed: {} channel(s), {} consumer(s)",
        config.channels.len(),
        config.channels.iter().map(|c| c.consumers.len()).sum::<usize>()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[channel]]
        video_mode = "pal"

        [[channel.consumer]]
        filename = "out.mxf"
        vrate = 50000
        separate_key = true
        options = "movflags=faststart, flush_packets=1"

        [[channel]]
        video_mode = "1080i5000"
    "#;

    #[test]
    fn parses_channels_and_consumers() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.channels.len(), 2);

        let consumer = &config.channels[0].consumers[0];
        assert_eq!(consumer.filename, "out.mxf");
        assert_eq!(consumer.vrate, 50000);
        assert!(consumer.separate_key);
        assert!(!consumer.narrow);
        assert_eq!(
            consumer.parsed_options().unwrap(),
            vec![
                ("movflags".to_string(), "faststart".to_string()),
                ("flush_packets".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_unknown_video_mode() {
        let err = parse_config(
            r#"
            [[channel]]
            video_mode = "4320p240"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("video_mode"));
    }

    #[test]
    fn rejects_malformed_options() {
        let err = parse_config(
            r#"
            [[channel]]
            video_mode = "pal"

            [[channel.consumer]]
            filename = "out.mp4"
            options = "oops"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playout.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.channels[0].video_mode, "pal");
    }
}
