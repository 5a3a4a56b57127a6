//! Audio metadata extraction.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

/// Whatever could be read from the file. Absent fields are filled in by the
/// ingest pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Seconds.
    pub duration: Option<f64>,
    /// Bits per second.
    pub bitrate: Option<i64>,
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<TrackMetadata, MetadataError>;
}

/// Reads tags, duration and bitrate through `ffprobe`.
#[derive(Debug, Default, Clone)]
pub struct FfprobeExtractor;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn find_tag(tags: &HashMap<String, String>, key: &str) -> Option<String> {
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_ffprobe_output(json: &str) -> Result<TrackMetadata, MetadataError> {
    let probe: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| MetadataError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| MetadataError::InvalidOutput("No audio stream found".to_string()))?;

    // Vorbis style containers keep their tags on the stream.
    let tag = |key: &str| find_tag(&probe.format.tags, key).or_else(|| find_tag(&audio_stream.tags, key));

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let bitrate = audio_stream
        .bit_rate
        .as_ref()
        .or(probe.format.bit_rate.as_ref())
        .and_then(|b| b.parse::<i64>().ok())
        .filter(|b| *b > 0);

    Ok(TrackMetadata {
        title: tag("title"),
        artist: tag("artist"),
        duration,
        bitrate,
    })
}

#[async_trait]
impl MetadataExtractor for FfprobeExtractor {
    async fn extract(&self, path: &Path) -> Result<TrackMetadata, MetadataError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MetadataError::ProbeFailed(stderr.to_string()));
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extractor that reads nothing, leaving the pipeline's filename defaults
/// in place. Used when `ffprobe` is not available.
#[derive(Debug, Default, Clone)]
pub struct FilenameExtractor;

#[async_trait]
impl MetadataExtractor for FilenameExtractor {
    async fn extract(&self, _path: &Path) -> Result<TrackMetadata, MetadataError> {
        Ok(TrackMetadata::default())
    }
}

/// Checks whether `ffprobe` can be spawned.
pub async fn ffprobe_available() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
