//! Error types for the media tools.

use std::path::PathBuf;
use thiserror::Error;

/// The inspection tool could not tell us the source geometry.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("media inspection failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("unreadable inspection output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no video stream found in {0}")]
    NoVideoStream(PathBuf),

    #[error("invalid video dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("implausible duration {0}s")]
    ImplausibleDuration(f64),
}

/// The encoder failed for one rendition.
#[derive(Debug, Error)]
#[error("transcode of {rendition} failed: {message}")]
pub struct TranscodeError {
    pub rendition: String,
    pub message: String,
}

impl TranscodeError {
    pub fn new(rendition: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rendition: rendition.into(),
            message: message.into(),
        }
    }
}
