//! ffprobe wrapper.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::error::ProbeError;

/// Source geometry needed to plan renditions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

/// Anything longer than two days is corrupt metadata, not a lesson.
pub const MAX_SOURCE_SECONDS: f64 = 48.0 * 3600.0;

impl MediaInfo {
    /// Geometry and duration as reported by an inspection tool, rejected when
    /// no encode could sensibly be planned from them.
    pub fn new(width: u32, height: u32, duration_seconds: f64) -> Result<Self, ProbeError> {
        if width == 0 || height == 0 {
            return Err(ProbeError::InvalidDimensions { width, height });
        }
        if !duration_seconds.is_finite() || duration_seconds > MAX_SOURCE_SECONDS {
            return Err(ProbeError::ImplausibleDuration(duration_seconds));
        }

        Ok(Self {
            width,
            height,
            duration_seconds: duration_seconds.max(0.0),
        })
    }
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_path: String,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        debug!("Probing {}", path.display());

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Launch {
                tool: self.ffprobe_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout, path)
    }
}

/// Extract geometry from `ffprobe -print_format json` output.
pub fn parse_probe_output(stdout: &[u8], path: &Path) -> Result<MediaInfo, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream(PathBuf::from(path)))?;

    // Container duration first, stream duration for containers that omit it.
    // Unknown or negative durations only cost progress reporting.
    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| !d.is_nan() && *d >= 0.0)
        .unwrap_or(0.0);

    MediaInfo::new(
        stream.width.unwrap_or(0),
        stream.height.unwrap_or(0),
        duration_seconds,
    )
}
